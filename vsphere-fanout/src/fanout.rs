//! Fan-out engine: one command, many targets, one keyed result
//!
//! Guarantees:
//! - every resolved target appears exactly once in the result
//! - a failing target never stops the others
//! - results keep the input order, whatever the parallelism
//! - on shutdown, no new target starts, in-flight calls drain, and the call
//!   reports `Cancelled` instead of returning a truncated result

use crate::connection::ConnectionParameters;
use crate::error::{FanoutError, ParseError, Result};
use crate::invoker::{CommandSpec, InvocationOutcome, RemoteInvoker, Target};
use crate::normalize::{normalize, TargetResult};
use futures::future;
use futures::stream::{self, StreamExt};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Which targets one call addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// The endpoint itself: a standalone ESXi host, or a vCenter acting alone
    Implicit,
    /// ESXi hosts reached through the endpoint
    Explicit(Vec<Target>),
}

impl Targets {
    pub fn explicit<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Target>,
    {
        let targets: Vec<Target> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            Targets::Implicit
        } else {
            Targets::Explicit(targets)
        }
    }

    /// Accepts the loosely typed target list callers send.
    ///
    /// Absent, `null` and `[]` select the implicit target. Anything that is
    /// not a list of host names is rejected, most commonly a single host
    /// passed as a bare string.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let items = match value {
            None | Some(Value::Null) => return Ok(Targets::Implicit),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(FanoutError::configuration(format!(
                    "target list must be a list of host names, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut targets = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(host) if host.is_empty() || host.trim() != host => {
                    return Err(FanoutError::configuration(format!(
                        "target host name {:?} is empty or padded with whitespace",
                        host
                    )))
                }
                Value::String(host) => targets.push(host.clone()),
                other => {
                    return Err(FanoutError::configuration(format!(
                        "target list entries must be non-empty host names, got {}",
                        json_kind(other)
                    )))
                }
            }
        }
        Ok(Targets::explicit(targets))
    }

    /// (result key, per-target override) pairs in input order, duplicates dropped
    fn resolve(&self, fallback: &str) -> Vec<(Target, Option<Target>)> {
        match self {
            Targets::Implicit => vec![(fallback.to_string(), None)],
            Targets::Explicit(targets) => {
                let mut seen = HashSet::with_capacity(targets.len());
                let mut resolved = Vec::with_capacity(targets.len());
                for target in targets {
                    if seen.insert(target.as_str()) {
                        resolved.push((target.clone(), Some(target.clone())));
                    } else {
                        warn!("Duplicate target {} ignored", target);
                    }
                }
                resolved
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Per-target results keyed by target, in insertion order.
/// Serializes as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResult<V> {
    entries: Vec<(Target, V)>,
}

impl<V> AggregateResult<V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn insert(&mut self, target: Target, value: V) {
        self.entries.push((target, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, target: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| key == target)
            .map(|(_, value)| value)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn map_values<U, F>(self, mut f: F) -> AggregateResult<U>
    where
        F: FnMut(V) -> U,
    {
        AggregateResult {
            entries: self
                .entries
                .into_iter()
                .map(|(key, value)| (key, f(value)))
                .collect(),
        }
    }
}

impl<T> AggregateResult<TargetResult<T>> {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|(_, result)| result.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }
}

impl<V: Serialize> Serialize for AggregateResult<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (target, value) in &self.entries {
            map.serialize_entry(target, value)?;
        }
        map.end()
    }
}

/// Runs one command against every resolved target through a [`RemoteInvoker`]
pub struct FanoutEngine<I> {
    invoker: Arc<I>,
    max_parallel: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<I: RemoteInvoker> FanoutEngine<I> {
    pub fn new(invoker: I) -> Self {
        Self::from_arc(Arc::new(invoker))
    }

    pub fn from_arc(invoker: Arc<I>) -> Self {
        Self {
            invoker,
            max_parallel: DEFAULT_MAX_PARALLEL,
            shutdown: None,
        }
    }

    /// Upper bound on concurrent remote calls, at least 1
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Once the watched value turns `true`, no further target is started
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    pub async fn fanout<T, P>(
        &self,
        targets: &Targets,
        fallback: &str,
        params: &ConnectionParameters,
        command: &CommandSpec,
        parse: P,
    ) -> Result<AggregateResult<TargetResult<T>>>
    where
        P: Fn(&InvocationOutcome) -> std::result::Result<T, ParseError>,
    {
        params.validate()?;

        let resolved = targets.resolve(fallback);
        let requested = resolved.len();
        debug!(
            "Fan-out of '{}' over {} target(s), max {} in flight",
            command, requested, self.max_parallel
        );

        let invoker = &*self.invoker;
        let outcomes: Vec<(Target, Result<InvocationOutcome>)> = stream::iter(resolved)
            .take_while(|_| future::ready(!self.is_shutting_down()))
            .map(|(key, target_override)| async move {
                let outcome = invoker.invoke(params, command, target_override.as_deref()).await;
                (key, outcome)
            })
            .buffered(self.max_parallel)
            .collect()
            .await;

        if outcomes.len() < requested {
            let completed = outcomes.len();
            let failed = drain(outcomes, &parse);
            return Err(FanoutError::Cancelled {
                completed,
                requested,
                failed,
            });
        }

        let mut aggregate = AggregateResult::with_capacity(requested);
        for (target, outcome) in outcomes {
            let result = normalize(outcome?, &parse).map_err(|source| FanoutError::Internal {
                target: target.clone(),
                source,
            })?;
            if let TargetResult::Failure(failure) = &result {
                warn!(
                    "{} failed with return code {}: {}",
                    target, failure.outcome.return_code, failure.message
                );
            }
            aggregate.insert(target, result);
        }

        info!(
            "Fan-out of '{}' complete: {} ok, {} failed",
            command,
            aggregate.succeeded(),
            aggregate.failed()
        );
        Ok(aggregate)
    }
}

/// Normalises the calls that finished after shutdown, returns how many failed
fn drain<T, P>(outcomes: Vec<(Target, Result<InvocationOutcome>)>, parse: &P) -> usize
where
    P: Fn(&InvocationOutcome) -> std::result::Result<T, ParseError>,
{
    let mut failed = 0;
    for (target, outcome) in outcomes {
        match outcome.map(|outcome| normalize(outcome, parse)) {
            Ok(Ok(TargetResult::Success(_))) => info!("Drained {} before shutdown: ok", target),
            Ok(Ok(TargetResult::Failure(failure))) => {
                failed += 1;
                warn!(
                    "Drained {} before shutdown: return code {}: {}",
                    target, failure.outcome.return_code, failure.message
                );
            }
            Ok(Err(e)) => {
                failed += 1;
                warn!("Drained {} before shutdown: unparseable output: {}", target, e);
            }
            Err(e) => {
                failed += 1;
                warn!("Drained {} before shutdown: {}", target, e);
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::scripted::ScriptedInvoker;
    use serde_json::json;
    use std::time::Duration;

    fn params() -> ConnectionParameters {
        ConnectionParameters::new("vcenter.lab", "root", "pw")
    }

    fn list_command() -> CommandSpec {
        CommandSpec::new(["network", "firewall", "ruleset", "list"])
    }

    fn stdout_len(outcome: &InvocationOutcome) -> std::result::Result<usize, ParseError> {
        Ok(outcome.stdout.len())
    }

    #[test]
    fn test_targets_from_value() {
        assert_eq!(Targets::from_value(None).unwrap(), Targets::Implicit);
        assert_eq!(Targets::from_value(Some(&json!(null))).unwrap(), Targets::Implicit);
        assert_eq!(Targets::from_value(Some(&json!([]))).unwrap(), Targets::Implicit);
        assert_eq!(
            Targets::from_value(Some(&json!(["esxi-1", "esxi-2"]))).unwrap(),
            Targets::Explicit(vec!["esxi-1".to_string(), "esxi-2".to_string()])
        );
    }

    #[test]
    fn test_targets_rejects_non_lists() {
        for bad in [
            json!("esxi-1"),
            json!(42),
            json!({"host": "esxi-1"}),
            json!(["esxi-1", 7]),
            json!([""]),
        ] {
            let err = Targets::from_value(Some(&bad)).unwrap_err();
            assert!(err.is_configuration(), "{} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn test_padded_host_names_are_rejected_not_rewritten() {
        for padded in [json!([" esxi-1 "]), json!(["esxi-1\t"]), json!(["esxi-2", "  "])] {
            let err = Targets::from_value(Some(&padded)).unwrap_err();
            assert!(err.is_configuration(), "{} should be rejected", padded);
            assert!(err.to_string().contains("padded"));
        }

        let engine = FanoutEngine::new(ScriptedInvoker::new().reply("esxi-1.lab", 0, "x"));
        let targets = Targets::from_value(Some(&json!(["esxi-1.lab"]))).unwrap();
        let result = engine
            .fanout(&targets, "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap();
        assert_eq!(result.targets().collect::<Vec<_>>(), vec!["esxi-1.lab"]);
    }

    #[tokio::test]
    async fn test_total_coverage_with_partial_failure() {
        let invoker = ScriptedInvoker::new()
            .reply("esxi-1", 0, "ok")
            .reply("esxi-2", 1, "Error: unreachable")
            .reply("esxi-3", 0, "fine");
        let engine = FanoutEngine::new(invoker);
        let targets = Targets::explicit(["esxi-1", "esxi-2", "esxi-3"]);

        let result = engine
            .fanout(&targets, "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.targets().collect::<Vec<_>>(), vec!["esxi-1", "esxi-2", "esxi-3"]);
        assert_eq!(result.get("esxi-1"), Some(&TargetResult::Success(2)));
        assert_eq!(result.get("esxi-2").unwrap().failure().unwrap().message, "Error: unreachable");
        assert_eq!(result.get("esxi-3"), Some(&TargetResult::Success(4)));
        assert_eq!((result.succeeded(), result.failed()), (2, 1));
        assert_eq!(engine.invoker().call_count(), 3);
    }

    #[tokio::test]
    async fn test_implicit_target_uses_fallback_key_without_override() {
        let engine = FanoutEngine::new(ScriptedInvoker::new().reply("vcenter.lab", 0, ""));

        let result = engine
            .fanout(&Targets::Implicit, "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap();

        assert_eq!(result.targets().collect::<Vec<_>>(), vec!["vcenter.lab"]);
        let calls = engine.invoker().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].host, "vcenter.lab");
        assert_eq!(calls[0].target_override, None);
    }

    #[tokio::test]
    async fn test_explicit_targets_pass_override_and_same_endpoint() {
        let engine = FanoutEngine::new(ScriptedInvoker::new());
        let targets = Targets::explicit(["esxi-1", "esxi-2", "esxi-1"]);

        let result = engine
            .fanout(&targets, "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        let calls = engine.invoker().calls();
        assert!(calls.iter().all(|c| c.host == "vcenter.lab" && c.command == list_command()));
        let overrides: Vec<_> = calls.iter().filter_map(|c| c.target_override.clone()).collect();
        assert_eq!(overrides.len(), 2);
        assert!(overrides.contains(&"esxi-1".to_string()));
        assert!(overrides.contains(&"esxi-2".to_string()));
    }

    #[tokio::test]
    async fn test_parallel_calls_are_bounded_and_ordered() {
        let invoker = ScriptedInvoker::new().with_delay(Duration::from_millis(30));
        let engine = FanoutEngine::new(invoker).with_max_parallel(3);
        let hosts: Vec<String> = (1..=9).map(|i| format!("esxi-{}", i)).collect();

        let result = engine
            .fanout(&Targets::explicit(hosts.clone()), "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap();

        assert_eq!(result.targets().map(str::to_string).collect::<Vec<_>>(), hosts);
        assert!(engine.invoker().peak_in_flight() <= 3);
        assert!(engine.invoker().peak_in_flight() > 1);
    }

    #[tokio::test]
    async fn test_parse_error_on_success_is_internal() {
        let engine = FanoutEngine::new(
            ScriptedInvoker::new()
                .reply("esxi-1", 1, "down")
                .reply("esxi-2", 0, "bad output"),
        );
        let reject = |_: &InvocationOutcome| -> std::result::Result<(), ParseError> {
            Err(ParseError::new(1, "unexpected format"))
        };

        let err = engine
            .fanout(&Targets::explicit(["esxi-1", "esxi-2"]), "vcenter.lab", &params(), &list_command(), reject)
            .await
            .unwrap_err();

        match err {
            FanoutError::Internal { target, source } => {
                assert_eq!(target, "esxi-2");
                assert_eq!(source.reason, "unexpected format");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_parameters_make_no_calls() {
        let engine = FanoutEngine::new(ScriptedInvoker::new());
        let bad = ConnectionParameters::new("vcenter.lab", "", "pw");

        let err = engine
            .fanout(&Targets::explicit(["esxi-1"]), "vcenter.lab", &bad, &list_command(), stdout_len)
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(engine.invoker().call_count(), 0);
    }

    #[tokio::test]
    async fn test_invoker_configuration_error_is_fatal() {
        let engine = FanoutEngine::new(ScriptedInvoker::new().reject("esxi-2", "bad credstore"));

        let err = engine
            .fanout(&Targets::explicit(["esxi-1", "esxi-2"]), "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap_err();

        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_invokes_nothing() {
        let (tx, rx) = watch::channel(false);
        let engine = FanoutEngine::new(ScriptedInvoker::new()).with_shutdown(rx);
        tx.send(true).unwrap();

        let err = engine
            .fanout(&Targets::explicit(["esxi-1", "esxi-2"]), "vcenter.lab", &params(), &list_command(), stdout_len)
            .await
            .unwrap_err();

        assert!(matches!(err, FanoutError::Cancelled { completed: 0, requested: 2, failed: 0 }));
        assert_eq!(engine.invoker().call_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_calls() {
        let (tx, rx) = watch::channel(false);
        let invoker = ScriptedInvoker::new().with_delay(Duration::from_millis(150));
        let engine = FanoutEngine::new(invoker).with_max_parallel(1).with_shutdown(rx);

        let signal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
            tx
        });

        let err = engine
            .fanout(
                &Targets::explicit(["esxi-1", "esxi-2", "esxi-3"]),
                "vcenter.lab",
                &params(),
                &list_command(),
                stdout_len,
            )
            .await
            .unwrap_err();
        let _tx = signal.await.unwrap();

        assert!(matches!(err, FanoutError::Cancelled { completed: 1, requested: 3, failed: 1 }));
        assert_eq!(engine.invoker().call_count(), 1);
    }

    #[tokio::test]
    async fn test_drained_calls_are_normalised() {
        let (tx, rx) = watch::channel(false);
        let invoker = ScriptedInvoker::new()
            .reply("esxi-1", 0, "ok")
            .reply("esxi-2", 1, "Error: host unreachable")
            .reply("esxi-3", 0, "ok")
            .with_delay(Duration::from_millis(150));
        let engine = FanoutEngine::new(invoker).with_max_parallel(2).with_shutdown(rx);

        let signal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
            tx
        });

        let err = engine
            .fanout(
                &Targets::explicit(["esxi-1", "esxi-2", "esxi-3", "esxi-4"]),
                "vcenter.lab",
                &params(),
                &list_command(),
                stdout_len,
            )
            .await
            .unwrap_err();
        let _tx = signal.await.unwrap();

        assert!(matches!(err, FanoutError::Cancelled { completed: 2, requested: 4, failed: 1 }));
        assert_eq!(engine.invoker().call_count(), 2);
        assert!(err.to_string().contains("(1 failed)"));
    }

    #[test]
    fn test_drain_counts_parse_rejections_as_failed() {
        let outcomes = vec![
            ("esxi-1".to_string(), Ok(InvocationOutcome::new("esxi-1", 0, "fine", ""))),
            ("esxi-2".to_string(), Ok(InvocationOutcome::new("esxi-2", 0, "garbage", ""))),
            ("esxi-3".to_string(), Err(FanoutError::configuration("bad host"))),
        ];
        let reject_garbage = |outcome: &InvocationOutcome| {
            if outcome.stdout == "garbage" {
                Err(ParseError::new(1, "garbage"))
            } else {
                Ok(())
            }
        };

        assert_eq!(drain(outcomes, &reject_garbage), 2);
    }

    #[test]
    fn test_aggregate_serializes_in_insertion_order() {
        let mut aggregate = AggregateResult::with_capacity(2);
        aggregate.insert("zeta".to_string(), 1);
        aggregate.insert("alpha".to_string(), 2);

        assert_eq!(serde_json::to_string(&aggregate).unwrap(), r#"{"zeta":1,"alpha":2}"#);
        assert_eq!(aggregate.map_values(|v| v * 10).get("alpha"), Some(&20));
    }
}
