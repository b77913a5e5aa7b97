//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses hashbrown maps protected by a single parking_lot RwLock.
//!
//! ## Limitations
//!
//! - **No isolation**: every call is applied immediately. Atomicity of
//!   multi-step mutations is provided one level up by `GraphTransaction`.
//! - **No property indexes**: property lookups do a full scan. Only the
//!   label index is maintained.
//!
//! Use this backend for:
//! - Testing the query, pattern, transaction and diff components
//! - Embedding the engine in applications that don't need persistence

use hashbrown::HashMap;
use parking_lot::RwLock;
use async_trait::async_trait;

use crate::model::*;
use crate::{Error, Result};
use super::{BackendCapabilities, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeKey, Edge>,
    /// node_id → keys of every edge touching the node
    adjacency: HashMap<NodeId, Vec<EdgeKey>>,
    /// label → node ids (insertion ordered)
    label_index: HashMap<String, Vec<NodeId>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }
}

impl MemoryInner {
    fn unindex_labels(&mut self, node: &Node) {
        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.retain(|nid| *nid != node.id);
            }
        }
    }

    fn detach_edge(&mut self, key: &EdgeKey) -> Option<Edge> {
        let edge = self.edges.remove(key)?;
        if let Some(keys) = self.adjacency.get_mut(&edge.from) {
            keys.retain(|k| k != key);
        }
        if edge.from != edge.to {
            if let Some(keys) = self.adjacency.get_mut(&edge.to) {
                keys.retain(|k| k != key);
            }
        }
        Some(edge)
    }
}

/// Merge updates into a property map; `Null` deletes the key.
fn merge_properties(target: &mut PropertyMap, updates: PropertyMap) {
    for (key, value) in updates {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    // ========================================================================
    // Node CRUD
    // ========================================================================

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        Ok(self.inner.read().nodes.get(id).cloned())
    }

    async fn add_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&node.id) {
            return Err(Error::ConstraintViolation(format!("Node {} already exists", node.id)));
        }
        for label in &node.labels {
            inner.label_index.entry(label.clone()).or_default().push(node.id.clone());
        }
        inner.adjacency.entry(node.id.clone()).or_default();
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn update_node(&self, id: &NodeId, updates: PropertyMap) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner.nodes.get_mut(id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        merge_properties(&mut node.properties, updates);
        Ok(())
    }

    async fn remove_node(&self, id: &NodeId) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.remove(id) else {
            return Ok(false);
        };
        inner.unindex_labels(&node);
        let attached = inner.adjacency.remove(id).unwrap_or_default();
        for key in &attached {
            inner.detach_edge(key);
        }
        Ok(true)
    }

    // ========================================================================
    // Edge CRUD
    // ========================================================================

    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        Ok(self.inner.read().edges.get(key).cloned())
    }

    async fn add_edge(&self, edge: Edge) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(&edge.from) {
            return Err(Error::NotFound(format!("Source node {}", edge.from)));
        }
        if !inner.nodes.contains_key(&edge.to) {
            return Err(Error::NotFound(format!("Target node {}", edge.to)));
        }
        let key = edge.key();
        if inner.edges.contains_key(&key) {
            return Err(Error::ConstraintViolation(format!("Edge {key} already exists")));
        }

        // Update adjacency for both endpoints
        inner.adjacency.entry(edge.from.clone()).or_default().push(key.clone());
        if edge.from != edge.to {
            inner.adjacency.entry(edge.to.clone()).or_default().push(key.clone());
        }
        inner.edges.insert(key, edge);
        Ok(())
    }

    async fn update_edge(&self, key: &EdgeKey, updates: PropertyMap) -> Result<()> {
        let mut inner = self.inner.write();
        let edge = inner.edges.get_mut(key).ok_or_else(|| Error::NotFound(format!("Edge {key}")))?;
        merge_properties(&mut edge.properties, updates);
        Ok(())
    }

    async fn remove_edge(&self, key: &EdgeKey) -> Result<bool> {
        Ok(self.inner.write().detach_edge(key).is_some())
    }

    // ========================================================================
    // Adjacency
    // ========================================================================

    async fn edges_for_node(&self, id: &NodeId) -> Result<Vec<Edge>> {
        let inner = self.inner.read();
        let Some(keys) = inner.adjacency.get(id) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|k| inner.edges.get(k).cloned()).collect())
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.inner.read().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn nodes_by_label(&self, label: &str) -> Result<Vec<Node>> {
        let inner = self.inner.read();
        let Some(ids) = inner.label_index.get(label) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| inner.nodes.get(id).cloned()).collect())
    }

    async fn all_edges(&self) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = self.inner.read().edges.values().cloned().collect();
        edges.sort_by_key(Edge::key);
        Ok(edges)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            label_index: true,
            full_scan: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
