//! Device event bus.
//!
//! The bridge only needs two things from the bus: register interest in one
//! alarm source and drop that interest again. Deliveries are pushed into the
//! dispatch queue tagged with the subscription they were registered under.

pub mod memory;
pub mod session;

use std::fmt;

use vmd_common::event::ROOT_TAG;
use vmd_common::{ACTIVE_KEY, EventKeyValueSet, ROOT_TOPIC, SOURCE_TAG, TNSAXIS};

use crate::dispatch::DispatchSender;
use crate::error::Result;

/// Identifies one registration with the bus. Zero never names a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionTag(pub u64);

impl SubscriptionTag {
    /// The tag of no subscription.
    pub const NONE: SubscriptionTag = SubscriptionTag(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SubscriptionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a subscription asks the bus for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Root topic (`tnsaxis:topic0`).
    pub root: String,
    /// Alarm source (`tnsaxis:topic1`).
    pub source: String,
    /// Boolean key the event must carry.
    pub required_key: String,
}

impl EventFilter {
    /// Build the filter for alarms of `source`. Any string names a source.
    pub fn for_source(source: &str) -> Self {
        Self {
            root: ROOT_TOPIC.to_string(),
            source: source.to_string(),
            required_key: ACTIVE_KEY.to_string(),
        }
    }

    /// Whether `event` belongs to this filter's topic.
    ///
    /// The required key is checked when the observation is extracted, so a
    /// malformed event on the right topic still reaches the dispatch loop and
    /// is reported there.
    pub fn matches_topic(&self, event: &EventKeyValueSet) -> bool {
        event.get_string(ROOT_TAG, Some(TNSAXIS)) == Some(self.root.as_str())
            && event.get_string(SOURCE_TAG, Some(TNSAXIS)) == Some(self.source.as_str())
    }
}

/// A device event bus the subscriber can register with.
pub trait EventBus {
    /// Registration handle, consumed on unsubscribe.
    type Handle;

    /// Register `filter`; deliveries go to `sink` tagged with `tag`.
    fn subscribe(
        &self,
        filter: &EventFilter,
        tag: SubscriptionTag,
        sink: DispatchSender,
    ) -> Result<Self::Handle>;

    /// Drop a registration. Deliveries for it stop once this returns.
    fn unsubscribe(&self, handle: Self::Handle) -> Result<()>;
}
