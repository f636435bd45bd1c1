use crate::error::{Error, Result};
use crate::event::ROOT_TOPIC;

/// Default key expression prefix for device events.
pub const EVENT_PREFIX: &str = "axis/event";

/// Builder for event-bus key expressions.
///
/// Events are published at `<prefix>/<topic0>/<topic1>/<topic2>`, mirroring the
/// hierarchical topic tags of the event itself.
#[derive(Debug, Clone)]
pub struct EventTopicBuilder {
    prefix: String,
}

impl Default for EventTopicBuilder {
    fn default() -> Self {
        Self::new(EVENT_PREFIX)
    }
}

impl EventTopicBuilder {
    /// Create a builder with a custom prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key expression an alarm with `source` and `label` is published on.
    ///
    /// # Example
    /// ```
    /// use vmd_common::topic::EventTopicBuilder;
    ///
    /// let builder = EventTopicBuilder::default();
    /// let key = builder.event_key("VMD", "Camera1ProfileANY").unwrap();
    /// assert_eq!(key, "axis/event/CameraApplicationPlatform/VMD/Camera1ProfileANY");
    /// ```
    pub fn event_key(&self, source: &str, label: &str) -> Result<String> {
        validate_chunk(source)?;
        validate_chunk(label)?;
        Ok(format!("{}/{}/{}/{}", self.prefix, ROOT_TOPIC, source, label))
    }

    /// Build the subscription key expression for every alarm of one source.
    ///
    /// # Example
    /// ```
    /// use vmd_common::topic::EventTopicBuilder;
    ///
    /// let builder = EventTopicBuilder::default();
    /// let key = builder.source_filter("FenceGuard").unwrap();
    /// assert_eq!(key, "axis/event/CameraApplicationPlatform/FenceGuard/**");
    /// ```
    pub fn source_filter(&self, source: &str) -> Result<String> {
        validate_chunk(source)?;
        Ok(format!("{}/{}/{}/**", self.prefix, ROOT_TOPIC, source))
    }

    /// Build the subscription key expression for every alarm of every source.
    ///
    /// # Example
    /// ```
    /// use vmd_common::topic::EventTopicBuilder;
    ///
    /// let builder = EventTopicBuilder::default();
    /// assert_eq!(builder.root_filter(), "axis/event/CameraApplicationPlatform/**");
    /// ```
    pub fn root_filter(&self) -> String {
        format!("{}/{}/**", self.prefix, ROOT_TOPIC)
    }

    /// Subscription key expression covering alarms of `source`.
    ///
    /// Narrows to the source's own key chunk when it can be one; otherwise
    /// covers every source and leaves the selection to the payload tags.
    pub fn alarm_filter(&self, source: &str) -> String {
        self.source_filter(source)
            .unwrap_or_else(|_| self.root_filter())
    }

    /// Build the key expression for bridge status.
    ///
    /// # Example
    /// ```
    /// use vmd_common::topic::EventTopicBuilder;
    ///
    /// assert_eq!(EventTopicBuilder::default().status_key(), "axis/event/@/status");
    /// ```
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Parse an event key expression back into its topic levels.
    ///
    /// Returns `None` if the key does not live under this prefix or lacks a
    /// topic level.
    pub fn parse<'a>(&self, key: &'a str) -> Option<ParsedEventTopic<'a>> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        Some(ParsedEventTopic {
            root: parts[0],
            source: parts[1],
            label: parts[2],
        })
    }
}

/// Parsed topic levels of an event key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEventTopic<'a> {
    pub root: &'a str,
    pub source: &'a str,
    pub label: &'a str,
}

/// Reject strings that cannot be a single key expression chunk.
fn validate_chunk(chunk: &str) -> Result<()> {
    if chunk.is_empty() {
        return Err(Error::Topic("empty topic level".to_string()));
    }
    if chunk
        .chars()
        .any(|c| matches!(c, '/' | '*' | '$' | '#' | '?'))
    {
        return Err(Error::Topic(format!(
            "'{}' contains a reserved key expression character",
            chunk
        )));
    }
    Ok(())
}
