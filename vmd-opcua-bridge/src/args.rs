//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use vmd_common::LoggingConfig;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "vmd-opcua.json5";

/// Exposes VMD alarms as OPC UA variables.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "VMD alarm to OPC UA bridge")]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// The configured logging settings with the CLI level applied.
    pub fn logging(&self, configured: &LoggingConfig) -> LoggingConfig {
        match &self.log_level {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: configured.format,
            },
            None => configured.clone(),
        }
    }
}
