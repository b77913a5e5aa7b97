//! # Storage Backend Trait
//!
//! This is THE contract between the engine and any graph store. The
//! engine never owns node/edge identity: it only reads and writes
//! through this interface.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory for testing/embedding |

pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::{Error, Result};

pub use memory::MemoryBackend;

// ============================================================================
// Backend capabilities
// ============================================================================

/// What a backend can do. Used by the matcher to choose a candidate
/// discovery strategy.
///
/// All fields default to false. Backends override via `capabilities()`.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// `nodes_by_label` is index-backed rather than a filtered scan.
    pub label_index: bool,
    /// `all_nodes` is implemented.
    pub full_scan: bool,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The storage contract.
///
/// Update semantics: `update_node`/`update_edge` merge the given
/// properties into the existing ones; a `Value::Null` update removes the
/// property. `remove_node` also removes every edge attached to the node.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Get a node by ID. Returns None if not found.
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>>;

    /// Insert a node. Fails if the id is already taken.
    async fn add_node(&self, node: Node) -> Result<()>;

    /// Merge property updates into an existing node.
    async fn update_node(&self, id: &NodeId, updates: PropertyMap) -> Result<()>;

    /// Delete a node and its attached edges. Returns true if it existed.
    async fn remove_node(&self, id: &NodeId) -> Result<bool>;

    // ========================================================================
    // Edge CRUD
    // ========================================================================

    /// Get an edge by its composite key.
    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>>;

    /// Insert an edge. Both endpoints must exist and the key must be free.
    async fn add_edge(&self, edge: Edge) -> Result<()>;

    /// Merge property updates into an existing edge.
    async fn update_edge(&self, key: &EdgeKey, updates: PropertyMap) -> Result<()>;

    /// Delete an edge. Returns true if it existed.
    async fn remove_edge(&self, key: &EdgeKey) -> Result<bool>;

    // ========================================================================
    // Adjacency
    // ========================================================================

    /// All edges touching a node, in either direction.
    async fn edges_for_node(&self, id: &NodeId) -> Result<Vec<Edge>>;

    /// Edges leaving a node.
    ///
    /// Default: filters `edges_for_node`.
    async fn outgoing_edges(&self, id: &NodeId) -> Result<Vec<Edge>> {
        let edges = self.edges_for_node(id).await?;
        Ok(edges.into_iter().filter(|e| e.from == *id).collect())
    }

    /// Edges arriving at a node.
    ///
    /// Default: filters `edges_for_node`.
    async fn incoming_edges(&self, id: &NodeId) -> Result<Vec<Edge>> {
        let edges = self.edges_for_node(id).await?;
        Ok(edges.into_iter().filter(|e| e.to == *id).collect())
    }

    /// Edges of a node in the given direction.
    async fn edges_in_direction(&self, id: &NodeId, dir: Direction) -> Result<Vec<Edge>> {
        match dir {
            Direction::Outgoing => self.outgoing_edges(id).await,
            Direction::Incoming => self.incoming_edges(id).await,
            Direction::Both => self.edges_for_node(id).await,
        }
    }

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return all nodes.
    ///
    /// Optional: backends that cannot enumerate report `full_scan: false`.
    async fn all_nodes(&self) -> Result<Vec<Node>> {
        Err(Error::StorageError("full node scan not supported".into()))
    }

    /// Find all nodes with a given label.
    ///
    /// Default: filters `all_nodes`. Backends with a real label index
    /// override this and report `label_index: true`.
    async fn nodes_by_label(&self, label: &str) -> Result<Vec<Node>> {
        let nodes = self.all_nodes().await?;
        Ok(nodes.into_iter().filter(|n| n.has_label(label)).collect())
    }

    /// Return all edges.
    ///
    /// Default: collects the outgoing edges of every node.
    async fn all_edges(&self) -> Result<Vec<Edge>> {
        let mut result = Vec::new();
        for node in self.all_nodes().await? {
            result.extend(self.outgoing_edges(&node.id).await?);
        }
        Ok(result)
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    /// Report what this backend can do.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}
