//! Raw invocation outcome -> canonical per-target result

use crate::error::ParseError;
use crate::invoker::InvocationOutcome;
use serde::Serialize;

/// A remote call that came back with a non-zero return code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFailure {
    /// Human readable error, taken from the remote standard output
    pub message: String,
    pub outcome: InvocationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResult<T> {
    Success(T),
    Failure(RemoteFailure),
}

impl<T> TargetResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetResult::Success(_))
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            TargetResult::Success(payload) => Some(payload),
            TargetResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RemoteFailure> {
        match self {
            TargetResult::Success(_) => None,
            TargetResult::Failure(failure) => Some(failure),
        }
    }
}

/// Remote tooling prints the actionable error on stdout; stderr is only
/// used when stdout carries nothing (spawn failures, timeouts).
pub fn error_message(outcome: &InvocationOutcome) -> String {
    let stdout = outcome.stdout.trim_end();
    if !stdout.trim().is_empty() {
        return stdout.to_string();
    }
    outcome.stderr.trim_end().to_string()
}

/// Shapes one outcome. A zero return code guarantees a defined output
/// format, so a parser rejection is returned to the caller as an error
/// instead of being folded into a failure result.
pub fn normalize<T, P>(outcome: InvocationOutcome, parse: &P) -> Result<TargetResult<T>, ParseError>
where
    P: Fn(&InvocationOutcome) -> Result<T, ParseError>,
{
    if outcome.return_code != 0 {
        return Ok(TargetResult::Failure(RemoteFailure {
            message: error_message(&outcome),
            outcome,
        }));
    }
    parse(&outcome).map(TargetResult::Success)
}
