//! Label to variable-node mapping.
//!
//! Every observation becomes a create-if-absent-then-update against the live
//! server's store. The table caches node handles so the store is probed only
//! for labels the table has not seen; whenever the two disagree the store
//! wins.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::Result;
use crate::server::ServerBackend;

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeWrite {
    /// A new variable was added.
    Created,
    /// An existing variable was overwritten.
    Updated,
}

/// Node handles of one server instance, keyed by label.
#[derive(Debug)]
pub struct NodeTable<N> {
    nodes: HashMap<String, N>,
}

impl<N> Default for NodeTable<N> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }
}

impl<N: Clone + std::fmt::Debug> NodeTable<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of labels known to the table.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `label` has a cached handle.
    pub fn contains(&self, label: &str) -> bool {
        self.nodes.contains_key(label)
    }

    /// Create the variable for `label` or overwrite its value.
    pub fn upsert<B>(&mut self, store: &B, label: &str, active: bool) -> Result<NodeWrite>
    where
        B: ServerBackend<Node = N>,
    {
        if let Some(node) = self.nodes.get(label) {
            match store.write_variable(node, active) {
                Ok(()) => {
                    info!(label, active, "Updated alarm node");
                    return Ok(NodeWrite::Updated);
                }
                Err(e) => {
                    debug!(label, error = %e, "Cached node rejected by store, re-resolving");
                    self.nodes.remove(label);
                }
            }
        }

        if let Some(node) = store.find_variable(label) {
            store.write_variable(&node, active)?;
            self.nodes.insert(label.to_string(), node);
            info!(label, active, "Updated alarm node");
            return Ok(NodeWrite::Updated);
        }

        let node = store.add_variable(label, active)?;
        self.nodes.insert(label.to_string(), node);
        info!(label, active, "Added alarm node");
        Ok(NodeWrite::Created)
    }
}
