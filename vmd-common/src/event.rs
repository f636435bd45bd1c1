//! Device event key-value sets.
//!
//! An event delivered by the analytics subsystem is a flat set of keys, some
//! of them namespaced (`tnsaxis:topic0`), carrying string or boolean values:
//!
//! ```text
//! tnsaxis:topic0 = 'CameraApplicationPlatform'
//! tnsaxis:topic1 = 'VMD'                  (alarm source)
//! tnsaxis:topic2 = 'Camera1ProfileANY'    (label)
//! active         = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace of the hierarchical topic tags.
pub const TNSAXIS: &str = "tnsaxis";

/// Root topic shared by every analytics alarm.
pub const ROOT_TOPIC: &str = "CameraApplicationPlatform";

/// Boolean key carrying the alarm state.
pub const ACTIVE_KEY: &str = "active";

/// Tag holding the alarm source (second-level topic).
pub const SOURCE_TAG: &str = "topic1";

/// Tag holding the alarm label (third-level topic).
pub const LABEL_TAG: &str = "topic2";

/// Root topic tag.
pub const ROOT_TAG: &str = "topic0";

/// A set of (optionally namespaced) event keys and their values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKeyValueSet {
    values: BTreeMap<String, serde_json::Value>,
}

fn qualified(key: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}:{}", ns, key),
        None => key.to_string(),
    }
}

impl EventKeyValueSet {
    /// Create an empty key-value set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the key-value set of a standard analytics alarm.
    pub fn alarm(source: &str, label: &str, active: bool) -> Self {
        Self::new()
            .with_string(ROOT_TAG, Some(TNSAXIS), ROOT_TOPIC)
            .with_string(SOURCE_TAG, Some(TNSAXIS), source)
            .with_string(LABEL_TAG, Some(TNSAXIS), label)
            .with_bool(ACTIVE_KEY, None, active)
    }

    /// Add a string value.
    pub fn with_string(
        mut self,
        key: &str,
        namespace: Option<&str>,
        value: impl Into<String>,
    ) -> Self {
        self.values.insert(
            qualified(key, namespace),
            serde_json::Value::String(value.into()),
        );
        self
    }

    /// Add a boolean value.
    pub fn with_bool(mut self, key: &str, namespace: Option<&str>, value: bool) -> Self {
        self.values
            .insert(qualified(key, namespace), serde_json::Value::Bool(value));
        self
    }

    /// Remove a key, returning the set.
    pub fn without(mut self, key: &str, namespace: Option<&str>) -> Self {
        self.values.remove(&qualified(key, namespace));
        self
    }

    /// Whether a key is present, whatever its type.
    pub fn contains(&self, key: &str, namespace: Option<&str>) -> bool {
        self.values.contains_key(&qualified(key, namespace))
    }

    /// Get a boolean value.
    ///
    /// The analytics subsystem sometimes reports states as `0`/`1`, so integer
    /// 0 and 1 are accepted too.
    pub fn get_boolean(&self, key: &str, namespace: Option<&str>) -> Option<bool> {
        match self.values.get(&qualified(key, namespace))? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get a string value.
    pub fn get_string(&self, key: &str, namespace: Option<&str>) -> Option<&str> {
        self.values
            .get(&qualified(key, namespace))?
            .as_str()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
