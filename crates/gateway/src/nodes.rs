//! Node registry
//!
//! The registry's persistence is pluggable behind [`NodeStore`]; the gateway
//! only needs get/put/delete by id. [`MemoryNodeStore`] is the default
//! in-process implementation.

use protocol::{ConnectionDescriptor, NodeId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// A managed bare-metal node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub descriptor: ConnectionDescriptor,
}

impl Node {
    pub fn new(id: NodeId, descriptor: ConnectionDescriptor) -> Self {
        Self { id, descriptor }
    }
}

/// CRUD contract for node persistence
pub trait NodeStore: Send + Sync {
    /// Look up a node by id
    fn get(&self, id: &NodeId) -> Option<Node>;

    /// Create or replace a node, returning the previous record
    fn put(&self, node: Node) -> Option<Node>;

    /// Remove a node, returning the removed record
    fn delete(&self, id: &NodeId) -> Option<Node>;

    /// Ids of all stored nodes
    fn ids(&self) -> Vec<NodeId>;
}

/// Node store kept in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<NodeId, Node>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Every mutation is a single map operation, so a poisoned lock still guards
// a consistent map.
impl NodeStore for MemoryNodeStore {
    fn get(&self, id: &NodeId) -> Option<Node> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn put(&self, node: Node) -> Option<Node> {
        debug!("Storing node {} ({})", node.id, node.descriptor.kind());
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.id.clone(), node)
    }

    fn delete(&self, id: &NodeId) -> Option<Node> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
