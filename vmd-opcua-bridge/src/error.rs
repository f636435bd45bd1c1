//! Error types for the bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A parameter value was rejected (e.g. port out of range).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The event filter could not be built or registered.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A delivered event lacked a required key.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// An operation was invoked in a state that does not allow it.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// The server run-loop thread could not be spawned.
    #[error("Execution context error: {0}")]
    ExecutionContext(String),

    /// The server instance could not be built.
    #[error("Server error: {0}")]
    Server(String),

    /// The node store rejected a create or update.
    #[error("Node store error: {0}")]
    NodeStore(String),

    /// Parameter store error.
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Zenoh error.
    #[error("Zenoh error: {0}")]
    Zenoh(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a lifecycle error.
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create an extraction error.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Create a subscription error.
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Whether this error aborts the process when it happens during startup.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Subscription(_) | Self::ExecutionContext(_) | Self::Server(_)
        )
    }
}

impl From<zenoh::Error> for BridgeError {
    fn from(err: zenoh::Error) -> Self {
        Self::Zenoh(err.to_string())
    }
}

impl From<vmd_common::Error> for BridgeError {
    fn from(err: vmd_common::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::Parameter(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::subscription("x").is_fatal_at_startup());
        assert!(BridgeError::ExecutionContext("x".into()).is_fatal_at_startup());
        assert!(!BridgeError::validation("x").is_fatal_at_startup());
        assert!(!BridgeError::extraction("x").is_fatal_at_startup());
        assert!(!BridgeError::lifecycle("x").is_fatal_at_startup());
    }

    #[test]
    fn test_display() {
        let err = BridgeError::validation("port 80 out of range");
        assert_eq!(err.to_string(), "Validation error: port 80 out of range");
    }
}
