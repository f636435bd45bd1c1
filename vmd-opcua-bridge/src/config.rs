//! Configuration for the VMD OPC UA bridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vmd_common::config::{LoggingConfig, ZenohConfig};
use vmd_common::topic::EVENT_PREFIX;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmdBridgeConfig {
    /// Zenoh connection settings (event bus)
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,

    /// OPC UA server settings
    #[serde(default)]
    pub opcua: OpcUaConfig,

    /// Runtime parameter store
    pub params: ParamsConfig,

    /// Dispatch loop settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Status publishing
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Key expression prefix events are published under (default: "axis/event")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    EVENT_PREFIX.to_string()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

/// OPC UA server settings. The port is a runtime parameter, not part of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Application name advertised by the server
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Namespace URI the alarm variables are registered under
    #[serde(default = "default_namespace_uri")]
    pub namespace_uri: String,

    /// Host name or address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// PKI directory for certificates
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Generate a self-signed keypair when none exists
    #[serde(default)]
    pub create_sample_keypair: bool,
}

fn default_application_name() -> String {
    "VMD Alarm OPC UA Server".to_string()
}

fn default_application_uri() -> String {
    "urn:vmd-opcua-bridge".to_string()
}

fn default_namespace_uri() -> String {
    "urn:vmd-opcua-bridge:alarms".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_pki_dir() -> PathBuf {
    PathBuf::from("./pki")
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            application_uri: default_application_uri(),
            namespace_uri: default_namespace_uri(),
            host: default_host(),
            pki_dir: default_pki_dir(),
            create_sample_keypair: false,
        }
    }
}

/// Runtime parameter store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// JSON5 file holding the `port` and `eventsource` parameters
    pub path: PathBuf,

    /// How often the file is checked for changes, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl ParamsConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Dispatch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Capacity of the queue feeding the dispatch loop
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Status publishing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Publish running/offline status on the event bus
    #[serde(default)]
    pub enabled: bool,
}

impl VmdBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: VmdBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events.key_prefix.is_empty() || self.events.key_prefix.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "events.key_prefix '{}' must be non-empty without a trailing '/'",
                self.events.key_prefix
            )));
        }

        if self.opcua.application_name.is_empty() {
            return Err(ConfigError::Validation(
                "opcua.application_name cannot be empty".to_string(),
            ));
        }

        if self.opcua.namespace_uri.is_empty() {
            return Err(ConfigError::Validation(
                "opcua.namespace_uri cannot be empty".to_string(),
            ));
        }

        if self.params.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "params.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "dispatch.queue_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
