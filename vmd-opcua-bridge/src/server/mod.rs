//! Protocol server lifecycle.
//!
//! [`ServerManager`] owns at most one server instance and the dedicated thread
//! running its request loop. Instances are built by a [`ServerFactory`]; the
//! production factory is [`ua::OpcUaFactory`], tests use
//! [`memory::MemoryFactory`].

pub mod memory;
pub mod ua;

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::nodes::{NodeTable, NodeWrite};

/// Lowest accepted listening port.
pub const MIN_PORT: u32 = 1024;

/// Highest accepted listening port.
pub const MAX_PORT: u32 = 65535;

/// Check that `port` lies in the accepted range.
pub fn validate_port(port: u32) -> Result<u16> {
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        return Err(BridgeError::validation(format!(
            "port {} outside {}..={}",
            port, MIN_PORT, MAX_PORT
        )));
    }
    Ok(port as u16)
}

/// Parse a decimal port parameter.
pub fn parse_port(value: &str) -> Result<u16> {
    let port: i64 = value
        .trim()
        .parse()
        .map_err(|_| BridgeError::validation(format!("port '{}' is not a number", value)))?;
    let port = u32::try_from(port)
        .map_err(|_| BridgeError::validation(format!("port '{}' is negative", value)))?;
    validate_port(port)
}

/// A server instance whose request loop runs on its own thread.
///
/// The node store must tolerate reads from the request loop while the
/// dispatch loop writes.
pub trait ServerBackend: Send + Sync + 'static {
    /// Handle to a variable node in the store.
    type Node: Clone + fmt::Debug + Send;

    /// Port the instance is bound to.
    fn port(&self) -> u16;

    /// Run the request loop. Blocks until [`abort`](Self::abort) is called.
    fn run(&self);

    /// Clear the running flag so [`run`](Self::run) returns.
    fn abort(&self);

    /// Look up the variable for `label`.
    fn find_variable(&self, label: &str) -> Option<Self::Node>;

    /// Add a read-only boolean variable named `label`.
    fn add_variable(&self, label: &str, value: bool) -> Result<Self::Node>;

    /// Overwrite the value of an existing variable.
    fn write_variable(&self, node: &Self::Node, value: bool) -> Result<()>;

    /// Read back the value of the variable for `label`.
    fn read_variable(&self, label: &str) -> Option<bool>;
}

/// Builds server instances and their run-loop threads.
pub trait ServerFactory {
    type Backend: ServerBackend;

    /// Allocate a new instance bound to `port`. No listener is active yet.
    fn build(&self, port: u16) -> Result<Arc<Self::Backend>>;

    /// Spawn the dedicated run-loop thread for `backend`.
    fn spawn_run_loop(&self, backend: Arc<Self::Backend>) -> std::io::Result<JoinHandle<()>> {
        let port = backend.port();
        std::thread::Builder::new()
            .name(format!("opcua-{}", port))
            .spawn(move || {
                info!(port, "Server run loop started");
                backend.run();
                info!(port, "Server run loop exited");
            })
    }
}

/// Lifecycle state of the managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No instance.
    Stopped,
    /// Instance allocated, no run loop.
    Created,
    /// Run loop being spawned.
    Starting,
    /// Run loop active.
    Running,
    /// Run loop being joined.
    Stopping,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Created => "created",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Instance<B: ServerBackend> {
    backend: Arc<B>,
    run_loop: Option<JoinHandle<()>>,
    nodes: NodeTable<B::Node>,
}

/// Owns the single server instance and drives its state machine.
pub struct ServerManager<F: ServerFactory> {
    factory: F,
    state: ServerState,
    instance: Option<Instance<F::Backend>>,
}

impl<F: ServerFactory> ServerManager<F> {
    /// Create a manager with no instance.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            state: ServerState::Stopped,
            instance: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether the run loop is active.
    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Port of the current instance, if any.
    pub fn port(&self) -> Option<u16> {
        self.instance.as_ref().map(|i| i.backend.port())
    }

    /// Number of allocated instances (0 or 1).
    pub fn instance_count(&self) -> usize {
        usize::from(self.instance.is_some())
    }

    /// The factory instances are built with.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Allocate an instance bound to `port`.
    pub fn create(&mut self, port: u32) -> Result<()> {
        let port = validate_port(port)?;

        if self.state != ServerState::Stopped || self.instance.is_some() {
            return Err(BridgeError::lifecycle(format!(
                "create({}) while {}",
                port, self.state
            )));
        }

        info!(port, "Creating OPC UA server");
        let backend = self.factory.build(port)?;

        self.instance = Some(Instance {
            backend,
            run_loop: None,
            nodes: NodeTable::new(),
        });
        self.state = ServerState::Created;
        Ok(())
    }

    /// Spawn the run-loop thread of the created instance.
    ///
    /// On failure the instance stays created and `start` may be retried.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(BridgeError::lifecycle(format!("start() while {}", self.state)));
        }
        let Some(instance) = self.instance.as_mut() else {
            return Err(BridgeError::lifecycle("start() without an instance"));
        };

        self.state = ServerState::Starting;
        match self.factory.spawn_run_loop(instance.backend.clone()) {
            Ok(handle) => {
                instance.run_loop = Some(handle);
                self.state = ServerState::Running;
                info!(port = instance.backend.port(), "OPC UA server started");
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Created;
                error!(error = %e, "Failed to spawn server run loop");
                Err(BridgeError::ExecutionContext(e.to_string()))
            }
        }
    }

    /// Create and start an instance on `port`.
    pub fn launch(&mut self, port: u32) -> Result<()> {
        self.create(port)?;
        self.start()
    }

    /// Stop the run loop, wait for its thread, and delete the instance.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != ServerState::Running {
            return Err(BridgeError::lifecycle(format!("stop() while {}", self.state)));
        }
        let Some(mut instance) = self.instance.take() else {
            return Err(BridgeError::lifecycle("stop() without an instance"));
        };

        self.state = ServerState::Stopping;
        let port = instance.backend.port();
        info!(port, nodes = instance.nodes.len(), "Stopping OPC UA server");

        instance.backend.abort();
        if let Some(handle) = instance.run_loop.take() {
            if handle.join().is_err() {
                error!(port, "Server run loop panicked");
            }
        }

        self.state = ServerState::Stopped;
        debug!(port, "OPC UA server deleted");
        Ok(())
    }

    /// Delete a created instance whose run loop never started.
    pub fn discard(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(BridgeError::lifecycle(format!("discard() while {}", self.state)));
        }
        if let Some(instance) = self.instance.take() {
            debug!(port = instance.backend.port(), "Discarding unstarted server");
        }
        self.state = ServerState::Stopped;
        Ok(())
    }

    /// Replace the running instance with a fresh one bound to `port`.
    ///
    /// An invalid port leaves everything untouched. If the new instance cannot
    /// be brought up, the previous port is relaunched (with an empty store)
    /// and the original error is returned.
    pub fn reconfigure(&mut self, port: u32) -> Result<()> {
        let new_port = validate_port(port)?;

        if self.state != ServerState::Running {
            return Err(BridgeError::lifecycle(format!(
                "reconfigure({}) while {}",
                new_port, self.state
            )));
        }
        let old_port = self.port().unwrap_or(new_port);

        info!(old_port, new_port, "Reconfiguring OPC UA server");
        self.stop()?;

        let result = match self.create(u32::from(new_port)) {
            Ok(()) => match self.start() {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.discard()?;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(old_port, new_port, error = %e, "Reconfigure failed, restoring previous port");
            if let Err(restore) = self.launch(u32::from(old_port)) {
                error!(old_port, error = %restore, "Failed to restore previous server");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Reflect an observation into the running instance's node store.
    pub fn write_observation(&mut self, label: &str, active: bool) -> Result<NodeWrite> {
        if self.state != ServerState::Running {
            return Err(BridgeError::NodeStore(format!(
                "no running server to write '{}' to ({})",
                label, self.state
            )));
        }
        let Some(instance) = self.instance.as_mut() else {
            return Err(BridgeError::NodeStore("no server instance".to_string()));
        };

        instance
            .nodes
            .upsert(instance.backend.as_ref(), label, active)
    }

    /// Read back the value of `label` from the current instance.
    pub fn read_observation(&self, label: &str) -> Option<bool> {
        self.instance
            .as_ref()
            .and_then(|i| i.backend.read_variable(label))
    }

    /// Number of nodes the current instance has been given.
    pub fn node_count(&self) -> usize {
        self.instance.as_ref().map_or(0, |i| i.nodes.len())
    }

    /// The current instance's backend.
    pub fn backend(&self) -> Option<&Arc<F::Backend>> {
        self.instance.as_ref().map(|i| &i.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::memory::MemoryFactory;

    #[test]
    fn test_validate_port_range() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(1023).is_err());
        assert_eq!(validate_port(1024).unwrap(), 1024);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(65536).is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("4840").unwrap(), 4840);
        assert_eq!(parse_port(" 4841 ").unwrap(), 4841);
        assert!(matches!(parse_port("abc"), Err(BridgeError::Validation(_))));
        assert!(matches!(parse_port(""), Err(BridgeError::Validation(_))));
        assert!(matches!(parse_port("-4840"), Err(BridgeError::Validation(_))));
        assert!(matches!(parse_port("99999999999"), Err(BridgeError::Validation(_))));
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        assert_eq!(manager.state(), ServerState::Stopped);

        manager.create(4840).unwrap();
        assert_eq!(manager.state(), ServerState::Created);
        assert_eq!(manager.port(), Some(4840));
        assert_eq!(manager.factory().live_run_loops(), 0);

        manager.start().unwrap();
        assert_eq!(manager.state(), ServerState::Running);

        manager.stop().unwrap();
        assert_eq!(manager.state(), ServerState::Stopped);
        assert_eq!(manager.port(), None);
        assert_eq!(manager.instance_count(), 0);
        assert_eq!(manager.factory().live_run_loops(), 0);
    }

    #[test]
    fn test_create_rejects_invalid_port() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        assert!(matches!(manager.create(80), Err(BridgeError::Validation(_))));
        assert_eq!(manager.state(), ServerState::Stopped);
    }

    #[test]
    fn test_duplicate_create_is_lifecycle_error() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        manager.create(4840).unwrap();
        assert!(matches!(manager.create(4841), Err(BridgeError::Lifecycle(_))));
        assert_eq!(manager.port(), Some(4840));
    }

    #[test]
    fn test_stop_when_not_running_is_lifecycle_error() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        assert!(matches!(manager.stop(), Err(BridgeError::Lifecycle(_))));

        manager.launch(4840).unwrap();
        manager.stop().unwrap();
        assert!(matches!(manager.stop(), Err(BridgeError::Lifecycle(_))));
    }

    #[test]
    fn test_start_failure_keeps_created_instance() {
        let factory = MemoryFactory::new();
        factory.fail_next_spawn();
        let mut manager = ServerManager::new(factory);

        manager.create(4840).unwrap();
        assert!(matches!(manager.start(), Err(BridgeError::ExecutionContext(_))));
        assert_eq!(manager.state(), ServerState::Created);
        assert_eq!(manager.port(), Some(4840));

        manager.start().unwrap();
        assert!(manager.is_running());
        manager.stop().unwrap();
    }

    #[test]
    fn test_write_requires_running() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        assert!(matches!(
            manager.write_observation("Camera1ProfileANY", true),
            Err(BridgeError::NodeStore(_))
        ));

        manager.create(4840).unwrap();
        assert!(matches!(
            manager.write_observation("Camera1ProfileANY", true),
            Err(BridgeError::NodeStore(_))
        ));
        assert_eq!(manager.node_count(), 0);
    }

    #[test]
    fn test_reconfigure_requires_running() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        assert!(matches!(manager.reconfigure(4841), Err(BridgeError::Lifecycle(_))));

        manager.create(4840).unwrap();
        assert!(matches!(manager.reconfigure(4841), Err(BridgeError::Lifecycle(_))));
        assert_eq!(manager.port(), Some(4840));
    }

    #[test]
    fn test_reconfigure_restores_previous_port_on_spawn_failure() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        manager.launch(4840).unwrap();

        manager.factory().fail_next_spawn();
        let result = manager.reconfigure(4841);

        assert!(matches!(result, Err(BridgeError::ExecutionContext(_))));
        assert!(manager.is_running());
        assert_eq!(manager.port(), Some(4840));
        assert_eq!(manager.factory().live_run_loops(), 1);
        manager.stop().unwrap();
    }

    #[test]
    fn test_reconfigure_restores_previous_port_on_build_failure() {
        let mut manager = ServerManager::new(MemoryFactory::new());
        manager.launch(4840).unwrap();

        manager.factory().fail_next_build();
        let result = manager.reconfigure(4841);

        assert!(matches!(result, Err(BridgeError::Server(_))));
        assert!(manager.is_running());
        assert_eq!(manager.port(), Some(4840));
        manager.stop().unwrap();
    }
}
