//! Connection parameters shared read-only by every target of one call

use crate::error::{FanoutError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint and credentials for one operation call.
///
/// `host` is either the ESXi machine itself or a vCenter endpoint fronting
/// the ESXi hosts named in the target list.
#[derive(Clone, Deserialize)]
pub struct ConnectionParameters {
    #[serde(alias = "endpoint")]
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Passed through to the remote tooling, never read here
    #[serde(default)]
    pub credstore: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionParameters {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            protocol: Protocol::default(),
            port: DEFAULT_PORT,
            credstore: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credstore(mut self, path: impl Into<PathBuf>) -> Self {
        self.credstore = Some(path.into());
        self
    }

    /// Structural checks, run before any remote call
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(FanoutError::configuration("'host' must not be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(FanoutError::configuration("'username' must not be empty"));
        }
        if self.port == 0 {
            return Err(FanoutError::configuration("'port' must be between 1 and 65535"));
        }
        if let Some(path) = &self.credstore {
            if path.as_os_str().is_empty() {
                return Err(FanoutError::configuration("'credstore' must not be an empty path"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .field("credstore", &self.credstore)
            .finish()
    }
}
