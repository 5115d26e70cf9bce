//! `esxcli` process invoker
//!
//! Runs the VMware `esxcli` client as a child process, one per target:
//!   esxcli [--credstore <path>] -s <endpoint> [-h <esxi host>] -u <user> -p <password>
//!          --protocol=<proto> --portnumber=<port> <command words...>
//! No shell is involved, so passwords and rule-set names are passed verbatim.

use super::{CommandSpec, InvocationOutcome, RemoteInvoker};
use crate::connection::ConnectionParameters;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// Return code reported when the call exceeds its timeout (same as coreutils `timeout`)
pub const TIMEOUT_RETURN_CODE: i32 = 124;
/// Return code reported when the client binary cannot be started
pub const SPAWN_FAILURE_RETURN_CODE: i32 = 127;

#[derive(Debug, Clone)]
pub struct EsxcliInvoker {
    binary: PathBuf,
    timeout: Duration,
}

impl EsxcliInvoker {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn build_args(
        params: &ConnectionParameters,
        command: &CommandSpec,
        target_override: Option<&str>,
    ) -> Vec<String> {
        let mut args = Vec::with_capacity(12 + command.words().len());

        if let Some(credstore) = &params.credstore {
            args.push("--credstore".to_string());
            args.push(credstore.to_string_lossy().into_owned());
        }
        args.push("-s".to_string());
        args.push(params.host.clone());
        if let Some(esxi_host) = target_override {
            args.push("-h".to_string());
            args.push(esxi_host.to_string());
        }
        args.push("-u".to_string());
        args.push(params.username.clone());
        args.push("-p".to_string());
        args.push(params.password.clone());
        args.push(format!("--protocol={}", params.protocol));
        args.push(format!("--portnumber={}", params.port));
        args.extend(command.words().iter().cloned());

        args
    }

    /// Quoted command line for logs, password replaced by `***`
    pub fn masked_command_line(&self, args: &[String]) -> String {
        let mut masked = Vec::with_capacity(args.len() + 1);
        masked.push(self.binary.to_string_lossy().into_owned());
        let mut hide_next = false;
        for arg in args {
            if hide_next {
                masked.push("***".to_string());
                hide_next = false;
            } else {
                hide_next = arg == "-p";
                masked.push(arg.clone());
            }
        }
        shell_words::join(masked)
    }
}

impl RemoteInvoker for EsxcliInvoker {
    async fn invoke(
        &self,
        params: &ConnectionParameters,
        command: &CommandSpec,
        target_override: Option<&str>,
    ) -> Result<InvocationOutcome> {
        params.validate()?;

        let target = target_override.unwrap_or(&params.host).to_string();
        let args = Self::build_args(params, command, target_override);
        debug!("Executing on {}: {}", target, self.masked_command_line(&args));

        let start_time = Instant::now();
        let child = AsyncCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let outcome = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => InvocationOutcome {
                target,
                return_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => {
                warn!("Failed to start {}: {}", self.binary.display(), e);
                InvocationOutcome::new(
                    target,
                    SPAWN_FAILURE_RETURN_CODE,
                    "",
                    format!("Failed to execute {}: {}", self.binary.display(), e),
                )
            }
            Err(_) => {
                warn!("esxcli call on {} timed out after {:?}", target, self.timeout);
                InvocationOutcome::new(
                    target,
                    TIMEOUT_RETURN_CODE,
                    "",
                    format!("Command timed out after {}s", self.timeout.as_secs()),
                )
            }
        };

        debug!(
            "{} returned {} in {}ms",
            outcome.target,
            outcome.return_code,
            start_time.elapsed().as_millis()
        );
        Ok(outcome)
    }
}
