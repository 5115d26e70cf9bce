//! ESXi firewall rule-set operations
//!
//! Two thin configurations of the fan-out engine:
//! - `get_firewall_status`: `network firewall ruleset list`, parsed per host
//! - `set_firewall_ruleset`: `network firewall ruleset set`, raw record per host
//!
//! Both address either the endpoint itself or the ESXi hosts behind a
//! vCenter endpoint (`esxi_hosts`).

mod parse;

pub use parse::parse_ruleset_list;

use crate::capabilities::{probe_esxcli, CapabilityInfo};
use crate::config::EngineConfig;
use crate::connection::ConnectionParameters;
use crate::error::{FanoutError, Result};
use crate::fanout::{AggregateResult, FanoutEngine, Targets};
use crate::invoker::esxcli::EsxcliInvoker;
use crate::invoker::{CommandSpec, InvocationOutcome, RemoteInvoker};
use crate::normalize::TargetResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

/// Name under which the host framework registers this module
pub const VIRTUAL_NAME: &str = "vsphere_firewall";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub enabled: bool,
}

/// Per-host payload of a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallStatus {
    pub success: bool,
    pub rulesets: Option<Vec<Ruleset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TargetResult<Vec<Ruleset>>> for FirewallStatus {
    fn from(result: TargetResult<Vec<Ruleset>>) -> Self {
        match result {
            TargetResult::Success(rulesets) => FirewallStatus {
                success: true,
                rulesets: Some(rulesets),
                error: None,
            },
            TargetResult::Failure(failure) => FirewallStatus {
                success: false,
                rulesets: None,
                error: Some(failure.message),
            },
        }
    }
}

/// Raw remote execution record, reported as-is for mutations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl From<&InvocationOutcome> for ExecutionRecord {
    fn from(outcome: &InvocationOutcome) -> Self {
        Self {
            return_code: outcome.return_code,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
        }
    }
}

pub fn list_rulesets_command() -> CommandSpec {
    CommandSpec::new(["network", "firewall", "ruleset", "list"])
}

/// Validated enable/disable request for one rule-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetToggle {
    pub enable: bool,
    pub name: String,
}

impl RulesetToggle {
    pub fn new(enable: bool, name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FanoutError::configuration("'ruleset_name' must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(FanoutError::configuration(format!(
                "'ruleset_name' must be a single rule-set id, got '{}'",
                name
            )));
        }
        Ok(Self {
            enable,
            name: name.to_string(),
        })
    }

    /// Accepts the boolean-like values callers send for `ruleset_enable`
    pub fn from_value(enable: &Value, name: &str) -> Result<Self> {
        let enable = bool_like(enable).ok_or_else(|| {
            FanoutError::configuration(format!("'ruleset_enable' must be a boolean, got {}", enable))
        })?;
        Self::new(enable, name)
    }

    pub fn command(&self) -> CommandSpec {
        CommandSpec::new([
            "network".to_string(),
            "firewall".to_string(),
            "ruleset".to_string(),
            "set".to_string(),
            "--enabled".to_string(),
            self.enable.to_string(),
            format!("--ruleset-id={}", self.name),
        ])
    }
}

fn bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub struct FirewallModule<I> {
    engine: FanoutEngine<I>,
    available: bool,
}

impl FirewallModule<EsxcliInvoker> {
    /// Probes for the esxcli client and wires an engine around it.
    /// The module is returned even when the probe fails, with its gate closed.
    pub fn with_esxcli(
        config: &EngineConfig,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> (Self, CapabilityInfo) {
        let capability = probe_esxcli(config.esxcli_path.as_deref());
        let binary = capability
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::capabilities::ESXCLI));

        let mut engine = FanoutEngine::new(EsxcliInvoker::new(binary, config.invoke_timeout()))
            .with_max_parallel(config.max_parallel);
        if let Some(shutdown) = shutdown {
            engine = engine.with_shutdown(shutdown);
        }

        if capability.available {
            info!("Module {} available ({:?})", VIRTUAL_NAME, capability.path);
        } else {
            warn!(
                "Module {} unavailable: {}",
                VIRTUAL_NAME,
                capability.reason.as_deref().unwrap_or("unknown reason")
            );
        }

        (Self::new(engine, capability.available), capability)
    }
}

impl<I: RemoteInvoker> FirewallModule<I> {
    pub fn new(engine: FanoutEngine<I>, available: bool) -> Self {
        Self { engine, available }
    }

    pub fn name(&self) -> &'static str {
        VIRTUAL_NAME
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn engine(&self) -> &FanoutEngine<I> {
        &self.engine
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(FanoutError::Unavailable(format!(
                "{} requires the esxcli client",
                VIRTUAL_NAME
            )))
        }
    }

    /// Status of every firewall rule-set, per host
    pub async fn get_firewall_status(
        &self,
        params: &ConnectionParameters,
        esxi_hosts: Option<&Value>,
    ) -> Result<AggregateResult<FirewallStatus>> {
        self.ensure_available()?;
        let targets = Targets::from_value(esxi_hosts)?;

        let results = self
            .engine
            .fanout(&targets, &params.host, params, &list_rulesets_command(), |outcome| {
                parse_ruleset_list(&outcome.stdout)
            })
            .await?;

        Ok(results.map_values(FirewallStatus::from))
    }

    /// Enables or disables one rule-set, per host
    pub async fn set_firewall_ruleset(
        &self,
        params: &ConnectionParameters,
        ruleset_enable: &Value,
        ruleset_name: &str,
        esxi_hosts: Option<&Value>,
    ) -> Result<AggregateResult<ExecutionRecord>> {
        self.ensure_available()?;
        let toggle = RulesetToggle::from_value(ruleset_enable, ruleset_name)?;
        let targets = Targets::from_value(esxi_hosts)?;

        let results = self
            .engine
            .fanout(&targets, &params.host, params, &toggle.command(), |outcome| {
                Ok(ExecutionRecord::from(outcome))
            })
            .await?;

        Ok(results.map_values(|result| match result {
            TargetResult::Success(record) => record,
            TargetResult::Failure(failure) => ExecutionRecord::from(&failure.outcome),
        }))
    }
}
