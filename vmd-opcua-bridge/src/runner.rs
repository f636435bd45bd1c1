//! Process lifecycle.
//!
//! Connects the event bus, fetches the runtime parameters, runs the dispatch
//! loop on a blocking thread, and tears everything down on SIGINT, SIGTERM
//! or SIGABRT.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::oneshot;

use vmd_common::{BridgeStatus, EventTopicBuilder, connect};

use crate::bridge::AlarmBridge;
use crate::bus::session::ZenohEventBus;
use crate::config::VmdBridgeConfig;
use crate::dispatch;
use crate::error::{BridgeError, Result};
use crate::params::{EVENTSOURCE_PARAM, PORT_PARAM, ParamFile, ParamWatcher};
use crate::server::ua::OpcUaFactory;

/// Name the bridge reports itself under.
pub const BRIDGE_NAME: &str = "vmd-opcua";

/// Runs the bridge until a termination signal arrives.
pub struct BridgeRunner {
    config: VmdBridgeConfig,
    version: String,
}

impl BridgeRunner {
    pub fn new(config: VmdBridgeConfig) -> Self {
        Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn config(&self) -> &VmdBridgeConfig {
        &self.config
    }

    /// Run the bridge.
    ///
    /// Returns an error only when a mandatory startup step fails: the Zenoh
    /// session, the parameter store, the initial server spawn or the initial
    /// subscription.
    pub async fn run(self) -> Result<()> {
        tracing::info!(bridge = BRIDGE_NAME, version = %self.version, "Starting bridge");

        let session = Arc::new(
            connect(&self.config.zenoh)
                .await
                .map_err(|e| BridgeError::Zenoh(e.to_string()))?,
        );

        let result = self.run_on(session.clone()).await;

        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }
        tracing::info!(bridge = BRIDGE_NAME, "Goodbye!");

        result
    }

    /// Run the bridge on an already open session, which is left open.
    ///
    /// A startup failure is published as an error status before it is
    /// returned.
    pub async fn run_on(&self, session: Arc<zenoh::Session>) -> Result<()> {
        let result = self.run_with_session(session.clone()).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Bridge startup failed");
            let status = BridgeStatus::error(BRIDGE_NAME, &self.version, e.to_string());
            self.publish_status(&session, status).await;
        }
        result
    }

    async fn publish_status(&self, session: &zenoh::Session, status: BridgeStatus) {
        if !self.config.status.enabled {
            return;
        }
        let key = EventTopicBuilder::new(&self.config.events.key_prefix).status_key();
        if let Err(e) = status.publish(session, &key).await {
            tracing::warn!(status = %status.status, error = %e, "Failed to publish status");
        }
    }

    async fn run_with_session(&self, session: Arc<zenoh::Session>) -> Result<()> {
        let topics = EventTopicBuilder::new(&self.config.events.key_prefix);

        let (watcher, initial) = ParamWatcher::register(
            ParamFile::new(&self.config.params.path),
            &[PORT_PARAM, EVENTSOURCE_PARAM],
            self.config.params.poll_interval(),
        )?;
        let port = initial_value(&initial, PORT_PARAM)?;
        let source = initial_value(&initial, EVENTSOURCE_PARAM)?;

        let (sink, mut dispatcher) = dispatch::channel(self.config.dispatch.queue_capacity);
        let mut bridge = AlarmBridge::new(
            OpcUaFactory::new(self.config.opcua.clone()),
            ZenohEventBus::new(session.clone(), topics),
            sink.clone(),
        );

        let (ready_tx, ready_rx) = oneshot::channel::<Result<serde_json::Value>>();
        let mut bridge_task = tokio::task::spawn_blocking(move || {
            if let Err(e) = bridge.startup(&port, &source) {
                let _ = ready_tx.send(Err(e));
                return;
            }
            let _ = ready_tx.send(Ok(bridge.status_metadata()));

            let applied = dispatcher.run(&mut bridge);
            tracing::info!(applied, "Dispatch loop exited");
            bridge.shutdown();
        });

        let metadata = match ready_rx.await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                let _ = bridge_task.await;
                return Err(e);
            }
            Err(_) => {
                return Err(BridgeError::ExecutionContext(
                    "dispatch thread exited during startup".to_string(),
                ));
            }
        };

        let watch_task = tokio::spawn(watcher.run(sink.clone()));

        let status = BridgeStatus::running(BRIDGE_NAME, &self.version).with_metadata(metadata);
        self.publish_status(&session, status).await;

        tracing::info!(bridge = BRIDGE_NAME, "Bridge running. Press Ctrl+C to stop.");

        tokio::select! {
            name = shutdown_signal() => {
                tracing::info!(bridge = BRIDGE_NAME, signal = name, "Received shutdown signal");
                if let Err(e) = sink.shutdown().await {
                    tracing::warn!(error = %e, "Dispatch loop already gone");
                }
                watch_task.abort();
                if let Err(e) = (&mut bridge_task).await {
                    tracing::error!(error = %e, "Dispatch thread failed");
                }
            }
            joined = &mut bridge_task => {
                watch_task.abort();
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Dispatch thread failed");
                }
                tracing::warn!("Dispatch loop exited unexpectedly");
            }
        }

        self.publish_status(&session, BridgeStatus::offline(BRIDGE_NAME, &self.version))
            .await;

        Ok(())
    }
}

fn initial_value(initial: &[(String, String)], name: &str) -> Result<String> {
    initial
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| BridgeError::Parameter(format!("parameter '{}' not registered", name)))
}

/// Resolves with the name of the first of SIGINT, SIGTERM or SIGABRT.
async fn shutdown_signal() -> &'static str {
    let termination = termination_listener();
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        name = termination => name,
    }
}

#[cfg(unix)]
const SIGABRT: i32 = 6;

/// Registers the SIGTERM and SIGABRT handlers now; the returned future
/// resolves with the name of whichever arrives first.
#[cfg(unix)]
fn termination_listener() -> impl Future<Output = &'static str> {
    use signal::unix::{Signal, SignalKind};

    fn listen(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal::unix::signal(kind)
            .inspect_err(|e| tracing::error!(signal = name, error = %e, "Failed to listen for signal"))
            .ok()
    }

    async fn received(stream: Option<Signal>) {
        match stream {
            Some(mut stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    let sigterm = listen(SignalKind::terminate(), "SIGTERM");
    let sigabrt = listen(SignalKind::from_raw(SIGABRT), "SIGABRT");
    async move {
        tokio::select! {
            _ = received(sigterm) => "SIGTERM",
            _ = received(sigabrt) => "SIGABRT",
        }
    }
}

#[cfg(not(unix))]
fn termination_listener() -> impl Future<Output = &'static str> {
    std::future::pending()
}
