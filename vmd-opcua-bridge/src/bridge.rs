//! The bridge aggregate.
//!
//! [`AlarmBridge`] owns the server manager and the event subscriber and is
//! the only thing the dispatch loop mutates.

use tracing::{debug, error, info, warn};
use vmd_common::EventKeyValueSet;

use crate::bus::{EventBus, SubscriptionTag};
use crate::dispatch::{DispatchEvent, DispatchSender};
use crate::error::{BridgeError, Result};
use crate::nodes::NodeWrite;
use crate::params::{EVENTSOURCE_PARAM, PORT_PARAM};
use crate::server::{ServerFactory, ServerManager, ServerState, parse_port};
use crate::subscriber::EventSubscriber;

/// Counters kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Observations written to the node store.
    pub observations_applied: u64,
    /// Observations dropped because they were malformed or the store refused them.
    pub observations_dropped: u64,
    /// Deliveries from a subscription that was no longer live.
    pub stale_discarded: u64,
    /// Parameter change notifications handled.
    pub parameter_changes: u64,
}

/// Exposes the alarms of one source as OPC UA variables.
pub struct AlarmBridge<F: ServerFactory, B: EventBus> {
    server: ServerManager<F>,
    subscriber: EventSubscriber<B>,
    stats: BridgeStats,
}

impl<F: ServerFactory, B: EventBus> AlarmBridge<F, B> {
    /// Create a bridge with no server and no subscription.
    ///
    /// Deliveries from `bus` are queued on `sink`.
    pub fn new(factory: F, bus: B, sink: DispatchSender) -> Self {
        Self {
            server: ServerManager::new(factory),
            subscriber: EventSubscriber::new(bus, sink),
            stats: BridgeStats::default(),
        }
    }

    pub fn server(&self) -> &ServerManager<F> {
        &self.server
    }

    pub fn subscriber(&self) -> &EventSubscriber<B> {
        &self.subscriber
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Apply the initial `port` and `eventsource` values, in that order.
    ///
    /// A rejected value is logged and leaves that part idle until the next
    /// change. Failing to build, spawn or subscribe tears everything down and
    /// returns the error.
    pub fn startup(&mut self, port: &str, source: &str) -> Result<()> {
        if let Err(e) = self.on_port_changed(port) {
            if e.is_fatal_at_startup() {
                error!(port, error = %e, "Failed to start OPC UA server");
                self.shutdown();
                return Err(e);
            }
            report(PORT_PARAM, port, &e);
        }

        if let Err(e) = self.on_eventsource_changed(source) {
            if e.is_fatal_at_startup() {
                error!(source, error = %e, "Failed to subscribe to alarm events");
                self.shutdown();
                return Err(e);
            }
            report(EVENTSOURCE_PARAM, source, &e);
        }

        info!(
            state = %self.server.state(),
            port = ?self.server.port(),
            source = ?self.subscriber.source(),
            "Bridge started"
        );
        Ok(())
    }

    /// Apply one unit of work from the dispatch queue.
    pub fn handle(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Alarm { tag, event } => {
                // Failures are counted and logged by on_alarm.
                let _ = self.on_alarm(tag, &event);
            }
            DispatchEvent::Parameter { name, value } => {
                if let Err(e) = self.on_parameter(&name, &value) {
                    report(&name, &value, &e);
                }
            }
            DispatchEvent::Shutdown => {
                debug!("Shutdown is handled by the dispatch loop");
            }
        }
    }

    /// Route a parameter change to its handler.
    pub fn on_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        self.stats.parameter_changes += 1;
        match name {
            PORT_PARAM => self.on_port_changed(value),
            EVENTSOURCE_PARAM => self.on_eventsource_changed(value),
            other => {
                debug!(param = other, "Ignoring unknown parameter");
                Ok(())
            }
        }
    }

    /// Bring the server up on the port in `value`, replacing any running
    /// instance on another port.
    pub fn on_port_changed(&mut self, value: &str) -> Result<()> {
        let port = parse_port(value)?;

        match self.server.state() {
            ServerState::Running if self.server.port() == Some(port) => {
                info!(port, "Port unchanged");
                Ok(())
            }
            ServerState::Running => self.server.reconfigure(u32::from(port)),
            ServerState::Stopped => self.server.launch(u32::from(port)),
            ServerState::Created => {
                self.server.discard()?;
                self.server.launch(u32::from(port))
            }
            state @ (ServerState::Starting | ServerState::Stopping) => Err(
                BridgeError::lifecycle(format!("port change to {} while {}", port, state)),
            ),
        }
    }

    /// Monitor `value` instead of the current source.
    pub fn on_eventsource_changed(&mut self, value: &str) -> Result<()> {
        if self.subscriber.source() == Some(value) {
            info!(source = value, "Event source unchanged");
            return Ok(());
        }
        self.subscriber.resubscribe(value).map(|_| ())
    }

    /// Reflect a delivered event in the node store.
    ///
    /// Returns `Ok(None)` when the delivery was stale. Malformed events and
    /// store rejections are logged and dropped.
    pub fn on_alarm(
        &mut self,
        tag: SubscriptionTag,
        event: &EventKeyValueSet,
    ) -> Result<Option<NodeWrite>> {
        let observation = match self.subscriber.accept(tag, event) {
            Ok(Some(observation)) => observation,
            Ok(None) => {
                self.stats.stale_discarded += 1;
                return Ok(None);
            }
            Err(e) => {
                self.stats.observations_dropped += 1;
                warn!(%tag, error = %e, "Dropping malformed alarm event");
                return Err(e);
            }
        };

        match self
            .server
            .write_observation(&observation.label, observation.active)
        {
            Ok(write) => {
                self.stats.observations_applied += 1;
                debug!(
                    label = %observation.label,
                    active = observation.active,
                    ?write,
                    "Alarm state applied"
                );
                Ok(Some(write))
            }
            Err(e) => {
                self.stats.observations_dropped += 1;
                warn!(
                    label = %observation.label,
                    active = observation.active,
                    error = %e,
                    "Dropping alarm observation"
                );
                Err(e)
            }
        }
    }

    /// Status metadata describing the live configuration.
    pub fn status_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "port": self.server.port(),
            "eventsource": self.subscriber.source(),
            "state": self.server.state().as_str(),
        })
    }

    /// Release the subscription and stop the server.
    pub fn shutdown(&mut self) {
        self.subscriber.unsubscribe();

        let result = match self.server.state() {
            ServerState::Running => self.server.stop(),
            ServerState::Created => self.server.discard(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to stop OPC UA server");
        }

        info!(
            applied = self.stats.observations_applied,
            dropped = self.stats.observations_dropped,
            stale = self.stats.stale_discarded,
            parameter_changes = self.stats.parameter_changes,
            "Bridge stopped"
        );
    }
}

fn report(param: &str, value: &str, err: &BridgeError) {
    match err {
        BridgeError::Validation(_) => {
            warn!(param, value, error = %err, "Rejected parameter value");
        }
        BridgeError::Lifecycle(_) => {
            error!(param, value, error = %err, "Invalid lifecycle transition");
        }
        _ => {
            error!(param, value, error = %err, "Failed to apply parameter change");
        }
    }
}
