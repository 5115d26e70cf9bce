//! Remote command execution against one target
//!
//! The engine only depends on the [`RemoteInvoker`] contract:
//! - ordinary remote failures (non-zero return code, refused connection,
//!   timeout) come back as an [`InvocationOutcome`], never as an error
//! - an error is reserved for malformed connection parameters detected
//!   before any network attempt

pub mod esxcli;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use crate::connection::ConnectionParameters;
use crate::error::{FanoutError, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;

/// Identifier of one managed endpoint (ESXi host address)
pub type Target = String;

/// Raw result of one remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationOutcome {
    pub target: Target,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutcome {
    pub fn new(
        target: impl Into<Target>,
        return_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            return_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

/// Command words handed to the remote tooling, built once per operation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    words: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line with shell quoting rules
    pub fn parse(line: &str) -> Result<Self> {
        let words = shell_words::split(line)
            .map_err(|e| FanoutError::configuration(format!("invalid command '{}': {}", line, e)))?;
        if words.is_empty() {
            return Err(FanoutError::configuration("command must not be empty"));
        }
        Ok(Self { words })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn command_line(&self) -> String {
        shell_words::join(&self.words)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Executes one command against one target endpoint.
///
/// `target_override` names the ESXi host behind a vCenter endpoint; when it
/// is `None` the command runs against `params.host` itself. The returned
/// outcome's `target` is the override if given, the endpoint otherwise.
pub trait RemoteInvoker: Send + Sync {
    fn invoke(
        &self,
        params: &ConnectionParameters,
        command: &CommandSpec,
        target_override: Option<&str>,
    ) -> impl Future<Output = Result<InvocationOutcome>> + Send;
}
