//! The dispatch loop.
//!
//! Event deliveries and parameter changes arrive from other threads as
//! [`DispatchEvent`]s on a bounded queue. A single consumer applies them to the
//! [`AlarmBridge`] one at a time, which is what keeps node writes and server
//! reconfiguration from ever interleaving.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vmd_common::EventKeyValueSet;

use crate::bridge::AlarmBridge;
use crate::bus::{EventBus, SubscriptionTag};
use crate::error::{BridgeError, Result};
use crate::server::ServerFactory;

/// A unit of work for the dispatch loop.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// An event delivered for the subscription identified by `tag`.
    Alarm {
        tag: SubscriptionTag,
        event: EventKeyValueSet,
    },
    /// A parameter changed value.
    Parameter { name: String, value: String },
    /// Leave the loop.
    Shutdown,
}

/// Producer side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<DispatchEvent>,
}

impl DispatchSender {
    /// Enqueue from a synchronous callback without blocking.
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// the loop has exited.
    pub fn try_deliver(&self, event: DispatchEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "Dispatch queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Dispatch loop gone, dropping event");
                false
            }
        }
    }

    /// Enqueue, waiting for room.
    pub async fn send(&self, event: DispatchEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| BridgeError::lifecycle("dispatch loop has exited"))
    }

    /// Ask the loop to exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(DispatchEvent::Shutdown).await
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the dispatch queue.
#[derive(Debug)]
pub struct Dispatcher {
    rx: mpsc::Receiver<DispatchEvent>,
}

/// Create a dispatch queue holding at most `capacity` pending events.
pub fn channel(capacity: usize) -> (DispatchSender, Dispatcher) {
    let (tx, rx) = mpsc::channel(capacity);
    (DispatchSender { tx }, Dispatcher { rx })
}

impl Dispatcher {
    #[cfg(test)]
    pub(crate) async fn recv(&mut self) -> Option<DispatchEvent> {
        self.rx.recv().await
    }

    /// Apply events until [`DispatchEvent::Shutdown`] arrives or every sender
    /// is dropped. Returns the number of events applied.
    ///
    /// Blocks the calling thread; run it on a dedicated or blocking thread.
    pub fn run<F, B>(&mut self, bridge: &mut AlarmBridge<F, B>) -> usize
    where
        F: ServerFactory,
        B: EventBus,
    {
        info!("Dispatch loop running");
        let mut applied = 0;

        while let Some(event) = self.rx.blocking_recv() {
            if matches!(event, DispatchEvent::Shutdown) {
                info!(applied, "Dispatch loop received shutdown");
                break;
            }
            bridge.handle(event);
            applied += 1;
        }

        // Nothing queued after this point is applied.
        self.rx.close();
        applied
    }

    /// Apply every event already queued, without waiting for more.
    ///
    /// Stops at a [`DispatchEvent::Shutdown`]. Returns the number applied.
    pub fn drain<F, B>(&mut self, bridge: &mut AlarmBridge<F, B>) -> usize
    where
        F: ServerFactory,
        B: EventBus,
    {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            if matches!(event, DispatchEvent::Shutdown) {
                break;
            }
            bridge.handle(event);
            applied += 1;
        }
        applied
    }
}
