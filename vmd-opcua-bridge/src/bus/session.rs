//! Zenoh-backed event bus.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use vmd_common::event::ROOT_TAG;
use vmd_common::{EventKeyValueSet, EventTopicBuilder, LABEL_TAG, SOURCE_TAG, TNSAXIS, decode_auto};
use zenoh::Wait;
use zenoh::pubsub::Subscriber;
use zenoh::sample::SampleKind;

use crate::bus::{EventBus, EventFilter, SubscriptionTag};
use crate::dispatch::{DispatchEvent, DispatchSender};
use crate::error::{BridgeError, Result};

/// Receives device events from a Zenoh session.
pub struct ZenohEventBus {
    session: Arc<zenoh::Session>,
    topics: EventTopicBuilder,
}

impl ZenohEventBus {
    pub fn new(session: Arc<zenoh::Session>, topics: EventTopicBuilder) -> Self {
        Self { session, topics }
    }
}

/// Fill topic tags the payload left out from the levels of the key it was
/// published on.
fn with_key_topics(
    mut event: EventKeyValueSet,
    topics: &EventTopicBuilder,
    key: &str,
) -> EventKeyValueSet {
    let Some(parsed) = topics.parse(key) else {
        return event;
    };
    for (tag, level) in [
        (ROOT_TAG, parsed.root),
        (SOURCE_TAG, parsed.source),
        (LABEL_TAG, parsed.label),
    ] {
        if !event.contains(tag, Some(TNSAXIS)) {
            event = event.with_string(tag, Some(TNSAXIS), level);
        }
    }
    event
}

impl EventBus for ZenohEventBus {
    type Handle = Subscriber<()>;

    fn subscribe(
        &self,
        filter: &EventFilter,
        tag: SubscriptionTag,
        sink: DispatchSender,
    ) -> Result<Subscriber<()>> {
        let key_expr = self.topics.alarm_filter(&filter.source);
        if key_expr == self.topics.root_filter() {
            debug!(source = %filter.source, "Source is not a single key chunk, filtering on payload tags");
        }

        let filter = filter.clone();
        let topics = self.topics.clone();
        let subscriber = self
            .session
            .declare_subscriber(&key_expr)
            .callback(move |sample| {
                if sample.kind() == SampleKind::Delete {
                    trace!(key = %sample.key_expr(), "Ignoring delete sample");
                    return;
                }

                let key = sample.key_expr().as_str();
                let payload = sample.payload().to_bytes();
                let event = match decode_auto::<EventKeyValueSet>(&payload) {
                    Ok(event) => with_key_topics(event, &topics, key),
                    Err(e) => {
                        warn!(key, error = %e, "Undecodable event payload");
                        return;
                    }
                };

                if !filter.matches_topic(&event) {
                    trace!(key, "Event outside filter");
                    return;
                }
                sink.try_deliver(DispatchEvent::Alarm { tag, event });
            })
            .wait()
            .map_err(|e| {
                BridgeError::subscription(format!("declare subscriber on '{}': {}", key_expr, e))
            })?;

        info!(key_expr = %key_expr, %tag, "Subscribed to alarm events");
        Ok(subscriber)
    }

    fn unsubscribe(&self, handle: Subscriber<()>) -> Result<()> {
        let key_expr = handle.key_expr().to_string();
        handle
            .undeclare()
            .wait()
            .map_err(|e| BridgeError::subscription(format!("undeclare '{}': {}", key_expr, e)))?;
        debug!(key_expr = %key_expr, "Unsubscribed from alarm events");
        Ok(())
    }
}
