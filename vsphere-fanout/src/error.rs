//! Error taxonomy shared by the fan-out engine and the firewall operations
//!
//! - `Configuration`: caller input rejected before any remote call
//! - `Internal`: a zero return code came back with output the parser refuses
//! - `Unavailable`: the capability gate is closed
//! - `Cancelled`: shutdown was signalled before every target was started
//!
//! Remote failures (non-zero return codes) are never errors: they live
//! inside the aggregate result, per target.

/// Malformed remote output despite a success return code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line number in the remote standard output
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: unparseable output from {target}: {source}")]
    Internal {
        target: String,
        #[source]
        source: ParseError,
    },
    #[error("Module unavailable: {0}")]
    Unavailable(String),
    #[error("Fan-out cancelled after {completed} of {requested} targets ({failed} failed)")]
    Cancelled {
        completed: usize,
        requested: usize,
        /// Drained targets that did not succeed
        failed: usize,
    },
}

impl FanoutError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors caused by caller input rather than by the remote side
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, FanoutError>;
