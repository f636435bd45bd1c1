//! Configuration sections shared by the bridge binaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role the process takes in the Zenoh network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZenohMode {
    Client,
    #[default]
    Peer,
    Router,
}

impl ZenohMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZenohMode::Client => "client",
            ZenohMode::Peer => "peer",
            ZenohMode::Router => "router",
        }
    }
}

impl fmt::Display for ZenohMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the event bus session connects and listens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZenohConfig {
    #[serde(default)]
    pub mode: ZenohMode,

    /// Routers or peers to dial, e.g. `tcp/10.0.0.2:7447`.
    #[serde(default)]
    pub connect: Vec<String>,

    /// Local endpoints to accept sessions on.
    #[serde(default)]
    pub listen: Vec<String>,
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `logging` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `vmd_opcua_bridge=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}
