//! Bridge status reporting.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name.
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata (port, event source, ...).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "running".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "offline".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "error" state.
    pub fn error(
        bridge: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "error".to_string(),
            metadata: serde_json::json!({ "error": error.into() }),
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status as JSON on `key`.
    pub async fn publish(&self, session: &zenoh::Session, key: &str) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        session.put(key, payload).await?;
        Ok(())
    }
}
