//! Engine settings, usually read from the `[engine]` table of the plugin config

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent remote calls per operation
    pub max_parallel: usize,
    /// Per-call timeout; a timed out call is reported as a failed target
    pub invoke_timeout_secs: u64,
    /// esxcli binary; looked up on PATH when unset
    pub esxcli_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: crate::fanout::DEFAULT_MAX_PARALLEL,
            invoke_timeout_secs: 120,
            esxcli_path: None,
        }
    }
}

impl EngineConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs.max(1))
    }
}
