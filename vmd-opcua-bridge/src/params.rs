//! Runtime parameters.
//!
//! `port` and `eventsource` live in a small JSON5 file that can be edited
//! while the bridge runs:
//!
//! ```json5
//! {
//!     port: "4840",
//!     eventsource: "VMD",
//! }
//! ```
//!
//! [`ParamWatcher`] fetches the registered parameters synchronously once and
//! then polls the file, queueing a [`DispatchEvent::Parameter`] for every
//! value that changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatch::{DispatchEvent, DispatchSender};
use crate::error::{BridgeError, Result};

/// Listening port of the OPC UA server.
pub const PORT_PARAM: &str = "port";

/// Alarm source to monitor.
pub const EVENTSOURCE_PARAM: &str = "eventsource";

/// A JSON5 parameter file.
#[derive(Debug, Clone)]
pub struct ParamFile {
    path: PathBuf,
}

impl ParamFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every parameter as a string.
    ///
    /// Numbers and booleans are accepted and rendered in decimal/`true`/`false`.
    pub fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            BridgeError::Parameter(format!("cannot read '{}': {}", self.path.display(), e))
        })?;
        let raw: BTreeMap<String, serde_json::Value> = json5::from_str(&content)?;

        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    other => {
                        warn!(param = %name, value = %other, "Ignoring non-scalar parameter");
                        return None;
                    }
                };
                Some((name, value))
            })
            .collect())
    }

    /// Read one parameter.
    pub fn get(&self, name: &str) -> Result<String> {
        self.read_all()?.remove(name).ok_or_else(|| {
            BridgeError::Parameter(format!(
                "parameter '{}' missing from '{}'",
                name,
                self.path.display()
            ))
        })
    }
}

/// Watches a set of parameters in a [`ParamFile`].
#[derive(Debug)]
pub struct ParamWatcher {
    file: ParamFile,
    current: BTreeMap<String, String>,
    interval: Duration,
}

impl ParamWatcher {
    /// Register `names` and fetch their current values.
    ///
    /// Every name must be present. The returned values are in `names` order
    /// and become the baseline later changes are detected against.
    pub fn register(
        file: ParamFile,
        names: &[&str],
        interval: Duration,
    ) -> Result<(Self, Vec<(String, String)>)> {
        let all = file.read_all()?;
        let mut current = BTreeMap::new();
        let mut initial = Vec::with_capacity(names.len());

        for name in names {
            let value = all.get(*name).cloned().ok_or_else(|| {
                BridgeError::Parameter(format!(
                    "parameter '{}' missing from '{}'",
                    name,
                    file.path().display()
                ))
            })?;
            info!(param = %name, value = %value, "Registered parameter");
            current.insert(name.to_string(), value.clone());
            initial.push((name.to_string(), value));
        }

        Ok((
            Self {
                file,
                current,
                interval,
            },
            initial,
        ))
    }

    /// Current known value of `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.current.get(name).map(String::as_str)
    }

    /// Re-read the file and return the registered parameters whose value
    /// changed. A missing parameter or unreadable file reports nothing.
    pub fn poll_changes(&mut self) -> Vec<(String, String)> {
        let all = match self.file.read_all() {
            Ok(all) => all,
            Err(e) => {
                warn!(path = %self.file.path().display(), error = %e, "Failed to read parameters");
                return Vec::new();
            }
        };

        let mut changes = Vec::new();
        for (name, value) in self.current.iter_mut() {
            match all.get(name) {
                Some(new_value) if new_value != value => {
                    info!(param = %name, old = %value, new = %new_value, "Parameter changed");
                    *value = new_value.clone();
                    changes.push((name.clone(), new_value.clone()));
                }
                Some(_) => {}
                None => {
                    debug!(param = %name, "Parameter missing, keeping last value");
                }
            }
        }
        changes
    }

    /// Poll until the dispatch loop goes away, queueing every change.
    pub async fn run(mut self, sink: DispatchSender) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and the baseline is already known.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            for (name, value) in self.poll_changes() {
                if sink
                    .send(DispatchEvent::Parameter { name, value })
                    .await
                    .is_err()
                {
                    debug!("Dispatch loop gone, parameter watch ending");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn param_file(content: &str) -> (tempfile::NamedTempFile, ParamFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        let params = ParamFile::new(file.path());
        (file, params)
    }

    fn rewrite(file: &tempfile::NamedTempFile, content: &str) {
        std::fs::write(file.path(), content).unwrap();
    }

    #[test]
    fn test_read_scalars() {
        let (_f, params) = param_file(r#"{ port: 4840, eventsource: "VMD", debug: true }"#);
        let all = params.read_all().unwrap();
        assert_eq!(all["port"], "4840");
        assert_eq!(all["eventsource"], "VMD");
        assert_eq!(all["debug"], "true");
    }

    #[test]
    fn test_get_missing() {
        let (_f, params) = param_file(r#"{ port: "4840" }"#);
        assert_eq!(params.get("port").unwrap(), "4840");
        assert!(matches!(params.get("eventsource"), Err(BridgeError::Parameter(_))));
    }

    #[test]
    fn test_register_returns_initial_values_in_order() {
        let (_f, params) = param_file(r#"{ eventsource: "FenceGuard", port: "4841" }"#);
        let (watcher, initial) =
            ParamWatcher::register(params, &[PORT_PARAM, EVENTSOURCE_PARAM], Duration::from_secs(1))
                .unwrap();

        assert_eq!(
            initial,
            vec![
                ("port".to_string(), "4841".to_string()),
                ("eventsource".to_string(), "FenceGuard".to_string()),
            ]
        );
        assert_eq!(watcher.value(PORT_PARAM), Some("4841"));
    }

    #[test]
    fn test_register_requires_every_name() {
        let (_f, params) = param_file(r#"{ port: "4840" }"#);
        let result =
            ParamWatcher::register(params, &[PORT_PARAM, EVENTSOURCE_PARAM], Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_poll_reports_only_changes() {
        let (f, params) = param_file(r#"{ port: "4840", eventsource: "VMD" }"#);
        let (mut watcher, _) =
            ParamWatcher::register(params, &[PORT_PARAM, EVENTSOURCE_PARAM], Duration::from_secs(1))
                .unwrap();

        assert!(watcher.poll_changes().is_empty());

        rewrite(&f, r#"{ port: "4841", eventsource: "VMD" }"#);
        assert_eq!(
            watcher.poll_changes(),
            vec![("port".to_string(), "4841".to_string())]
        );
        assert!(watcher.poll_changes().is_empty());
    }

    #[test]
    fn test_poll_survives_broken_file() {
        let (f, params) = param_file(r#"{ port: "4840", eventsource: "VMD" }"#);
        let (mut watcher, _) =
            ParamWatcher::register(params, &[PORT_PARAM, EVENTSOURCE_PARAM], Duration::from_secs(1))
                .unwrap();

        rewrite(&f, "{ port: ");
        assert!(watcher.poll_changes().is_empty());

        rewrite(&f, r#"{ eventsource: "MotionGuard" }"#);
        assert_eq!(
            watcher.poll_changes(),
            vec![("eventsource".to_string(), "MotionGuard".to_string())]
        );
        assert_eq!(watcher.value(PORT_PARAM), Some("4840"));
    }

    #[tokio::test]
    async fn test_run_queues_changes() {
        let (f, params) = param_file(r#"{ port: "4840", eventsource: "VMD" }"#);
        let (watcher, _) = ParamWatcher::register(
            params,
            &[PORT_PARAM, EVENTSOURCE_PARAM],
            Duration::from_millis(10),
        )
        .unwrap();

        let (tx, mut rx) = crate::dispatch::channel(8);
        let task = tokio::spawn(watcher.run(tx));

        rewrite(&f, r#"{ port: "4840", eventsource: "LoiteringGuard" }"#);

        let event = rx.recv().await.unwrap();
        match event {
            DispatchEvent::Parameter { name, value } => {
                assert_eq!(name, "eventsource");
                assert_eq!(value, "LoiteringGuard");
            }
            other => panic!("unexpected event {:?}", other),
        }
        task.abort();
    }
}
