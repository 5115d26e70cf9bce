//! Plugin configuration
//!
//! TOML file located by, in order:
//! - `$VSPHERE_FIREWALL_CONFIG`
//! - `<os config dir>/vsphere-firewall/config.toml`
//!
//! A missing file means defaults; a present but invalid file is an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use vsphere_fanout::EngineConfig;

pub const CONFIG_ENV: &str = "VSPHERE_FIREWALL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub mqtt: MqttConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            format!(
                "vsphere-plugin-firewall-{}",
                gethostname::gethostname().to_string_lossy()
            )
        })
    }
}

impl PluginConfig {
    /// Load config from `$VSPHERE_FIREWALL_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let config_path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_file_path()?,
        };

        if config_path.exists() {
            Self::load_from(&config_path).await
        } else {
            info!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: PluginConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("vsphere-firewall");
        path.push("config.toml");
        Ok(path)
    }
}
