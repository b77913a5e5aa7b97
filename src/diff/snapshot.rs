//! Point-in-time graph captures.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Edge, EdgeKey, Node, NodeId, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

use super::{ChangeKind, SnapshotDiffResult};

/// A versioned, immutable capture of nodes, edges and metadata.
///
/// Nodes are kept ordered by id and edges by key, so two captures of the
/// same graph compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl GraphSnapshot {
    pub fn new(version: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut snapshot = Self {
            version: version.into(),
            nodes,
            edges,
            metadata: BTreeMap::new(),
            captured_at: None,
        };
        snapshot.normalize();
        snapshot
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read every node and edge from a backend.
    pub async fn capture<B: StorageBackend + ?Sized>(backend: &B, version: impl Into<String>) -> Result<Self> {
        let nodes = backend.all_nodes().await?;
        let edges = backend.all_edges().await?;
        let mut snapshot = Self::new(version, nodes, edges);
        snapshot.captured_at = Some(Utc::now());
        tracing::debug!(
            version = %snapshot.version,
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "captured snapshot"
        );
        Ok(snapshot)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.id.cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.iter().find(|e| e.key() == *key)
    }

    fn normalize(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges.sort_by_key(Edge::key);
    }

    /// Produce the snapshot `diff` describes when applied to this one.
    ///
    /// Removals are applied before additions so that a removed/added
    /// pair for the same edge key replaces the edge.
    pub fn apply(&self, diff: &SnapshotDiffResult) -> Result<GraphSnapshot> {
        if diff.from_version != self.version {
            return Err(Error::InvalidSnapshot(format!(
                "diff starts at version {}, snapshot is {}",
                diff.from_version, self.version
            )));
        }

        let mut nodes: BTreeMap<NodeId, Node> =
            self.nodes.iter().map(|n| (n.id.clone(), n.clone())).collect();
        let mut edges: BTreeMap<EdgeKey, Edge> =
            self.edges.iter().map(|e| (e.key(), e.clone())).collect();

        for change in diff.edges.iter().filter(|c| c.kind == ChangeKind::Removed) {
            edges
                .remove(&change.key)
                .ok_or_else(|| missing("edge", &change.key))?;
        }
        for change in &diff.nodes {
            match change.kind {
                ChangeKind::Removed => {
                    nodes.remove(&change.id).ok_or_else(|| missing("node", &change.id))?;
                }
                ChangeKind::Modified => {
                    let node = nodes.get_mut(&change.id).ok_or_else(|| missing("node", &change.id))?;
                    for field in &change.changes {
                        apply_field(node, &field.field, &field.to)?;
                    }
                }
                ChangeKind::Added => {}
            }
        }
        for change in diff.nodes.iter().filter(|c| c.kind == ChangeKind::Added) {
            let node = change.node.clone().ok_or_else(|| {
                Error::InvalidSnapshot(format!("added node {} carries no data", change.id))
            })?;
            if nodes.insert(change.id.clone(), node).is_some() {
                return Err(Error::InvalidSnapshot(format!("node {} already exists", change.id)));
            }
        }
        for change in diff.edges.iter().filter(|c| c.kind == ChangeKind::Added) {
            if edges.insert(change.key.clone(), change.edge.clone()).is_some() {
                return Err(Error::InvalidSnapshot(format!("edge {} already exists", change.key)));
            }
        }

        let mut metadata = self.metadata.clone();
        for change in &diff.metadata {
            match &change.new {
                Some(value) => metadata.insert(change.key.clone(), value.clone()),
                None => metadata.remove(&change.key),
            };
        }

        Ok(GraphSnapshot {
            version: diff.to_version.clone(),
            nodes: nodes.into_values().collect(),
            edges: edges.into_values().collect(),
            metadata,
            captured_at: None,
        })
    }
}

fn missing(what: &str, id: &impl std::fmt::Display) -> Error {
    Error::InvalidSnapshot(format!("diff references {what} {id}, which is absent"))
}

/// Set one diffed field on a node. Unknown field names are left alone.
fn apply_field(node: &mut Node, field: &str, value: &Value) -> Result<()> {
    if field == "labels" {
        let labels = value
            .as_list()
            .ok_or_else(|| Error::InvalidSnapshot(format!("labels of node {} must be a list", node.id)))?;
        node.labels = labels.iter().filter_map(|l| l.as_str().map(str::to_string)).collect();
    } else if let Some(key) = field.strip_prefix("properties.") {
        if value.is_null() {
            node.properties.remove(key);
        } else {
            node.properties.insert(key.to_string(), value.clone());
        }
    }
    Ok(())
}

// ============================================================================
// Untyped input
// ============================================================================

/// Read a snapshot from loosely shaped JSON:
/// `{version, nodes: [{id, labels?, properties?}], edges: [{from, to, label|type, properties?}], metadata?}`.
pub(crate) fn from_json(json: &serde_json::Value, side: &str) -> Result<GraphSnapshot> {
    let invalid = |msg: &str| Error::InvalidSnapshot(format!("{side} snapshot {msg}"));
    let obj = json.as_object().ok_or_else(|| invalid("must be an object"))?;

    let version = match obj.get("version") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(invalid("has no version")),
    };
    let nodes = obj
        .get("nodes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("has no nodes collection"))?;
    let edges = obj
        .get("edges")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("has no edges collection"))?;

    let nodes = nodes
        .iter()
        .map(|n| node_from_json(n).ok_or_else(|| invalid(&format!("has a malformed node: {n}"))))
        .collect::<Result<Vec<_>>>()?;
    let edges = edges
        .iter()
        .map(|e| edge_from_json(e).ok_or_else(|| invalid(&format!("has a malformed edge: {e}"))))
        .collect::<Result<Vec<_>>>()?;

    let mut snapshot = GraphSnapshot::new(version, nodes, edges);
    if let Some(meta) = obj.get("metadata").and_then(|m| m.as_object()) {
        snapshot.metadata = meta.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect();
    }
    Ok(snapshot)
}

fn id_from_json(json: Option<&serde_json::Value>) -> Option<NodeId> {
    match json? {
        serde_json::Value::String(s) => Some(NodeId(s.clone())),
        serde_json::Value::Number(n) => Some(NodeId(n.to_string())),
        _ => None,
    }
}

fn properties_from_json(json: Option<&serde_json::Value>) -> crate::model::PropertyMap {
    json.and_then(|p| p.as_object())
        .map(|p| p.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect())
        .unwrap_or_default()
}

fn node_from_json(json: &serde_json::Value) -> Option<Node> {
    let mut node = Node::new(id_from_json(json.get("id"))?);
    if let Some(labels) = json.get("labels").and_then(|l| l.as_array()) {
        node.labels = labels.iter().filter_map(|l| l.as_str().map(str::to_string)).collect();
    }
    node.properties = properties_from_json(json.get("properties"));
    Some(node)
}

fn edge_from_json(json: &serde_json::Value) -> Option<Edge> {
    let label = json.get("label").or_else(|| json.get("type"))?.as_str()?;
    let mut edge = Edge::new(id_from_json(json.get("from"))?, id_from_json(json.get("to"))?, label);
    edge.properties = properties_from_json(json.get("properties"));
    Some(edge)
}
