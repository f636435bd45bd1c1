//! In-process event bus for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use vmd_common::EventKeyValueSet;

use crate::bus::{EventBus, EventFilter, SubscriptionTag};
use crate::dispatch::{DispatchEvent, DispatchSender};
use crate::error::{BridgeError, Result};

struct Registration {
    id: u64,
    filter: EventFilter,
    tag: SubscriptionTag,
    sink: DispatchSender,
}

#[derive(Default)]
struct Inner {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    fail_subscribe: AtomicBool,
}

/// Routes published events to matching registrations.
///
/// Clones share state, so a test can publish through one clone while the
/// subscriber owns another.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    inner: Arc<Inner>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next subscribe fail.
    pub fn fail_next_subscribe(&self) {
        self.inner.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Number of live registrations.
    pub fn registrations(&self) -> usize {
        self.inner
            .registrations
            .lock()
            .map(|regs| regs.len())
            .unwrap_or(0)
    }

    /// Sources currently registered.
    pub fn sources(&self) -> Vec<String> {
        self.inner
            .registrations
            .lock()
            .map(|regs| regs.iter().map(|r| r.filter.source.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliver `event` to every registration whose topic matches.
    ///
    /// Returns the number of deliveries queued.
    pub fn publish(&self, event: &EventKeyValueSet) -> usize {
        let Ok(regs) = self.inner.registrations.lock() else {
            return 0;
        };
        regs.iter()
            .filter(|r| r.filter.matches_topic(event))
            .filter(|r| {
                r.sink.try_deliver(DispatchEvent::Alarm {
                    tag: r.tag,
                    event: event.clone(),
                })
            })
            .count()
    }
}

impl EventBus for MemoryEventBus {
    type Handle = u64;

    fn subscribe(
        &self,
        filter: &EventFilter,
        tag: SubscriptionTag,
        sink: DispatchSender,
    ) -> Result<u64> {
        if self.inner.fail_subscribe.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::subscription(format!(
                "registration for '{}' refused",
                filter.source
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut regs = self
            .inner
            .registrations
            .lock()
            .map_err(|_| BridgeError::subscription("registry poisoned"))?;
        regs.push(Registration {
            id,
            filter: filter.clone(),
            tag,
            sink,
        });
        Ok(id)
    }

    fn unsubscribe(&self, handle: u64) -> Result<()> {
        let mut regs = self
            .inner
            .registrations
            .lock()
            .map_err(|_| BridgeError::subscription("registry poisoned"))?;
        let before = regs.len();
        regs.retain(|r| r.id != handle);
        if regs.len() == before {
            return Err(BridgeError::subscription(format!(
                "no registration with id {}",
                handle
            )));
        }
        Ok(())
    }
}
