//! Availability gate for the remote-execution client
//!
//! The firewall module is only usable when the `esxcli` client can be
//! found, either at an explicitly configured path or on `PATH`.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ESXCLI: &str = "esxcli";

/// Capability detection result
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub available: bool,
    pub path: Option<PathBuf>,
    pub reason: Option<String>,
}

pub fn probe_esxcli(explicit_path: Option<&Path>) -> CapabilityInfo {
    probe_binary(ESXCLI, explicit_path)
}

/// Resolves `name` to an executable. An explicit path must exist as a file;
/// otherwise the binary is looked up on `PATH`.
pub fn probe_binary(name: &str, explicit_path: Option<&Path>) -> CapabilityInfo {
    let resolved = match explicit_path {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(format!("{} not found at {}", name, path.display())),
        None => which::which(name).map_err(|e| format!("{} not found on PATH: {}", name, e)),
    };

    match resolved {
        Ok(path) => {
            debug!("Capability {} available at {}", name, path.display());
            CapabilityInfo {
                name: name.to_string(),
                available: true,
                path: Some(path),
                reason: None,
            }
        }
        Err(reason) => {
            debug!("Capability {} unavailable: {}", name, reason);
            CapabilityInfo {
                name: name.to_string(),
                available: false,
                path: None,
                reason: Some(reason),
            }
        }
    }
}
