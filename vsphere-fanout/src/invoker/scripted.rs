//! Scripted in-memory invoker for tests
//!
//! Replays a fixed outcome per target and records every call, so tests can
//! assert on what was sent without an ESXi host or an esxcli binary.

use super::{CommandSpec, InvocationOutcome, RemoteInvoker};
use crate::connection::ConnectionParameters;
use crate::error::{FanoutError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One call as seen by the invoker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub host: String,
    pub target_override: Option<String>,
    pub command: CommandSpec,
}

#[derive(Debug, Clone)]
enum Reply {
    Outcome {
        return_code: i32,
        stdout: String,
        stderr: String,
    },
    Configuration(String),
}

#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    replies: HashMap<String, Reply>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, target: &str, return_code: i32, stdout: &str) -> Self {
        self.reply_with_stderr(target, return_code, stdout, "")
    }

    pub fn reply_with_stderr(mut self, target: &str, return_code: i32, stdout: &str, stderr: &str) -> Self {
        self.replies.insert(
            target.to_string(),
            Reply::Outcome {
                return_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    /// Makes the call for `target` fail with a configuration error
    pub fn reject(mut self, target: &str, reason: &str) -> Self {
        self.replies
            .insert(target.to_string(), Reply::Configuration(reason.to_string()));
        self
    }

    /// Every call sleeps this long before replying
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls observed running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl RemoteInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        params: &ConnectionParameters,
        command: &CommandSpec,
        target_override: Option<&str>,
    ) -> Result<InvocationOutcome> {
        let target = target_override.unwrap_or(&params.host).to_string();
        self.calls.lock().push(RecordedCall {
            host: params.host.clone(),
            target_override: target_override.map(str::to_string),
            command: command.clone(),
        });

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.replies.get(&target) {
            Some(Reply::Outcome {
                return_code,
                stdout,
                stderr,
            }) => Ok(InvocationOutcome::new(target, *return_code, stdout.as_str(), stderr.as_str())),
            Some(Reply::Configuration(reason)) => Err(FanoutError::configuration(reason.clone())),
            None => {
                let stdout = format!("No scripted reply for {}", target);
                Ok(InvocationOutcome::new(target, 1, stdout, ""))
            }
        }
    }
}
