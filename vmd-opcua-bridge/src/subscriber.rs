//! Alarm event subscription.
//!
//! Holds at most one registration with the event bus and turns delivered
//! events into [`AlarmObservation`]s.

use tracing::{debug, error, info, warn};
use vmd_common::{ACTIVE_KEY, EventKeyValueSet, LABEL_TAG, TNSAXIS};

use crate::bus::{EventBus, EventFilter, SubscriptionTag};
use crate::dispatch::DispatchSender;
use crate::error::{BridgeError, Result};

/// One alarm state reported by the analytics subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmObservation {
    pub label: String,
    pub active: bool,
}

impl AlarmObservation {
    /// Extract the observation carried by `event`.
    pub fn from_event(event: &EventKeyValueSet) -> Result<Self> {
        let active = event.get_boolean(ACTIVE_KEY, None).ok_or_else(|| {
            BridgeError::extraction(format!("missing or non-boolean '{}' value", ACTIVE_KEY))
        })?;

        let label = event
            .get_string(LABEL_TAG, Some(TNSAXIS))
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                BridgeError::extraction(format!("missing '{}:{}' label", TNSAXIS, LABEL_TAG))
            })?;

        Ok(Self {
            label: label.to_string(),
            active,
        })
    }
}

struct ActiveSubscription<H> {
    source: String,
    tag: SubscriptionTag,
    handle: H,
}

/// Subscribes to one alarm source at a time.
pub struct EventSubscriber<B: EventBus> {
    bus: B,
    sink: DispatchSender,
    active: Option<ActiveSubscription<B::Handle>>,
    last_tag: u64,
}

impl<B: EventBus> EventSubscriber<B> {
    pub fn new(bus: B, sink: DispatchSender) -> Self {
        Self {
            bus,
            sink,
            active: None,
            last_tag: 0,
        }
    }

    /// Whether a subscription is live.
    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    /// Source of the live subscription.
    pub fn source(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.source.as_str())
    }

    /// Tag of the live subscription, or [`SubscriptionTag::NONE`].
    pub fn tag(&self) -> SubscriptionTag {
        self.active
            .as_ref()
            .map_or(SubscriptionTag::NONE, |a| a.tag)
    }

    /// Register interest in alarms from `source`.
    pub fn subscribe(&mut self, source: &str) -> Result<SubscriptionTag> {
        if let Some(active) = &self.active {
            return Err(BridgeError::lifecycle(format!(
                "subscribe('{}') while subscribed to '{}'",
                source, active.source
            )));
        }

        let filter = EventFilter::for_source(source);
        let tag = SubscriptionTag(self.last_tag + 1);

        let handle = self.bus.subscribe(&filter, tag, self.sink.clone())?;
        self.last_tag = tag.0;

        info!(source, %tag, "Monitoring alarm source");
        self.active = Some(ActiveSubscription {
            source: source.to_string(),
            tag,
            handle,
        });
        Ok(tag)
    }

    /// Drop the live subscription, if any. Returns whether one was dropped.
    pub fn unsubscribe(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            debug!("No subscription to release");
            return false;
        };

        info!(source = %active.source, tag = %active.tag, "Unsubscribing from alarm events");
        if let Err(e) = self.bus.unsubscribe(active.handle) {
            warn!(source = %active.source, error = %e, "Unsubscribe failed");
        }
        true
    }

    /// Switch to `source`: the old subscription is released before the new
    /// one is registered. If the new one fails, the old source is
    /// subscribed again and the error returned.
    pub fn resubscribe(&mut self, source: &str) -> Result<SubscriptionTag> {
        let previous = self.source().map(str::to_string);
        self.unsubscribe();

        match self.subscribe(source) {
            Ok(tag) => Ok(tag),
            Err(e) => {
                if let Some(previous) = previous {
                    warn!(source, previous = %previous, error = %e, "Resubscribe failed, restoring previous source");
                    if let Err(restore) = self.subscribe(&previous) {
                        error!(previous = %previous, error = %restore, "Failed to restore previous subscription");
                    }
                }
                Err(e)
            }
        }
    }

    /// Accept an event delivered under `tag`.
    ///
    /// Returns `Ok(None)` for deliveries from a subscription that is no
    /// longer live.
    pub fn accept(
        &self,
        tag: SubscriptionTag,
        event: &EventKeyValueSet,
    ) -> Result<Option<AlarmObservation>> {
        if tag.is_none() || tag != self.tag() {
            debug!(%tag, current = %self.tag(), "Discarding stale delivery");
            return Ok(None);
        }
        AlarmObservation::from_event(event).map(Some)
    }
}
