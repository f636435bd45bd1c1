//! OPC UA server backend built on the `opcua` crate.

use std::sync::Arc;

use opcua::server::prelude::*;
use opcua::sync::RwLock;
use tracing::{debug, info};

use crate::config::OpcUaConfig;
use crate::error::{BridgeError, Result};
use crate::server::{ServerBackend, ServerFactory};

const LOCALE: &str = "en-US";

/// A running (or runnable) OPC UA server instance.
pub struct OpcUaBackend {
    port: u16,
    server: Arc<RwLock<Server>>,
    address_space: Arc<RwLock<AddressSpace>>,
    namespace: u16,
}

impl OpcUaBackend {
    /// Node id of the variable for `label`.
    pub fn node_id(&self, label: &str) -> NodeId {
        NodeId::new(self.namespace, UAString::from(label))
    }
}

impl ServerBackend for OpcUaBackend {
    type Node = NodeId;

    fn port(&self) -> u16 {
        self.port
    }

    fn run(&self) {
        // Builds its own runtime and returns once the server is aborted.
        Server::run_server(self.server.clone());
    }

    fn abort(&self) {
        self.server.write().abort();
    }

    fn find_variable(&self, label: &str) -> Option<NodeId> {
        let node_id = self.node_id(label);
        let space = self.address_space.read();
        space.node_exists(&node_id).then_some(node_id)
    }

    fn add_variable(&self, label: &str, value: bool) -> Result<NodeId> {
        let node_id = self.node_id(label);
        let mut space = self.address_space.write();

        let inserted = VariableBuilder::new(
            &node_id,
            QualifiedName::new(self.namespace, label),
            LocalizedText::new(LOCALE, label),
        )
        .description(LocalizedText::new(LOCALE, label))
        .data_type(DataTypeId::Boolean)
        .value(value)
        .access_level(AccessLevel::CURRENT_READ)
        .user_access_level(UserAccessLevel::CURRENT_READ)
        .has_type_definition(VariableTypeId::BaseDataVariableType)
        .organized_by(ObjectId::ObjectsFolder)
        .insert(&mut space);

        if !inserted {
            return Err(BridgeError::NodeStore(format!(
                "address space refused node {}",
                node_id
            )));
        }

        debug!(node = %node_id, value, "Added variable node");
        Ok(node_id)
    }

    fn write_variable(&self, node: &NodeId, value: bool) -> Result<()> {
        let now = DateTime::now();
        let mut space = self.address_space.write();

        if !space.set_variable_value(node.clone(), value, &now, &now) {
            return Err(BridgeError::NodeStore(format!(
                "node {} not found in address space",
                node
            )));
        }
        Ok(())
    }

    fn read_variable(&self, label: &str) -> Option<bool> {
        let node_id = self.node_id(label);
        let space = self.address_space.read();

        match space.find_node(&node_id)? {
            NodeType::Variable(variable) => {
                let data_value = variable.value(
                    TimestampsToReturn::Neither,
                    NumericRange::None,
                    &QualifiedName::null(),
                    0.0,
                );
                match data_value.value {
                    Some(Variant::Boolean(b)) => Some(b),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Builds minimal anonymous-endpoint OPC UA servers.
#[derive(Debug, Clone)]
pub struct OpcUaFactory {
    config: OpcUaConfig,
}

impl OpcUaFactory {
    pub fn new(config: OpcUaConfig) -> Self {
        Self { config }
    }

    /// Endpoint URL a server on `port` is reachable at.
    pub fn endpoint_url(&self, port: u16) -> String {
        format!("opc.tcp://{}:{}/", self.config.host, port)
    }
}

impl ServerFactory for OpcUaFactory {
    type Backend = OpcUaBackend;

    fn build(&self, port: u16) -> Result<Arc<OpcUaBackend>> {
        let server = ServerBuilder::new_anonymous(self.config.application_name.clone())
            .application_uri(self.config.application_uri.clone())
            .product_uri(self.config.application_uri.clone())
            .host_and_port(self.config.host.clone(), port)
            .discovery_urls(vec![self.endpoint_url(port)])
            .pki_dir(self.config.pki_dir.clone())
            .create_sample_keypair(self.config.create_sample_keypair)
            .server()
            .ok_or_else(|| {
                BridgeError::Server(format!("invalid OPC UA server configuration for port {}", port))
            })?;

        let address_space = server.address_space();
        let namespace = address_space
            .write()
            .register_namespace(&self.config.namespace_uri)
            .map_err(|_| {
                BridgeError::Server(format!(
                    "cannot register namespace '{}'",
                    self.config.namespace_uri
                ))
            })?;

        info!(
            port,
            namespace,
            endpoint = %self.endpoint_url(port),
            "OPC UA server allocated"
        );

        Ok(Arc::new(OpcUaBackend {
            port,
            server: Arc::new(RwLock::new(server)),
            address_space,
            namespace,
        }))
    }
}
