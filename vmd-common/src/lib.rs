//! VMD Common Library
//!
//! Shared types and utilities for the VMD alarm OPC UA bridge:
//!
//! - [`event`] - Device event key-value sets and the well-known alarm keys
//! - [`serialization`] - JSON/CBOR encoding and decoding of event payloads
//! - [`topic`] - Event-bus key expression builders and parsers
//! - [`config`] - Configuration sections shared by the bridges
//! - [`session`] - Zenoh session management
//! - [`status`] - Bridge status records
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod event;
pub mod serialization;
pub mod session;
pub mod status;
pub mod topic;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode};
pub use error::{Error, Result};
pub use event::{ACTIVE_KEY, EventKeyValueSet, LABEL_TAG, ROOT_TOPIC, SOURCE_TAG, TNSAXIS};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use status::BridgeStatus;
pub use topic::{EVENT_PREFIX, EventTopicBuilder, ParsedEventTopic};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
