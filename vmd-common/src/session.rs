//! Opening the Zenoh session events are carried on.

use serde::Serialize;
use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// Translate the `zenoh` section into a Zenoh configuration.
pub fn build_zenoh_config(config: &ZenohConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();
    insert(&mut zenoh_config, "mode", config.mode.as_str())?;

    for (key, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if !endpoints.is_empty() {
            insert(&mut zenoh_config, key, endpoints)?;
        }
    }
    Ok(zenoh_config)
}

fn insert<T: Serialize + ?Sized>(
    zenoh_config: &mut zenoh::Config,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    zenoh_config
        .insert_json5(key, &json)
        .map_err(|e| Error::Config(format!("zenoh {} = {}: {}", key, json, e)))
}

/// Open a session as described by `config`.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let zenoh_config = build_zenoh_config(config)?;

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );
    let session = zenoh::open(zenoh_config).await?;
    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZenohMode;

    #[test]
    fn test_default_config_builds() {
        assert!(build_zenoh_config(&ZenohConfig::default()).is_ok());
    }

    #[test]
    fn test_client_with_endpoints() {
        let config = ZenohConfig {
            mode: ZenohMode::Client,
            connect: vec!["tcp/127.0.0.1:7447".to_string()],
            listen: Vec::new(),
        };
        assert!(build_zenoh_config(&config).is_ok());
    }

    #[test]
    fn test_malformed_endpoint_is_config_error() {
        let config = ZenohConfig {
            mode: ZenohMode::Peer,
            connect: Vec::new(),
            listen: vec!["not an endpoint".to_string()],
        };
        assert!(matches!(build_zenoh_config(&config), Err(Error::Config(_))));
    }
}
