use thiserror::Error;

/// Failures of the shared bridge plumbing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR error: {0}")]
    Cbor(String),

    #[error("Invalid event topic: {0}")]
    Topic(String),
}

impl<E: std::fmt::Debug> From<ciborium::ser::Error<E>> for Error {
    fn from(e: ciborium::ser::Error<E>) -> Self {
        Error::Cbor(format!("encode: {:?}", e))
    }
}

impl<E: std::fmt::Debug> From<ciborium::de::Error<E>> for Error {
    fn from(e: ciborium::de::Error<E>) -> Self {
        Error::Cbor(format!("decode: {:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
