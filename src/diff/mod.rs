//! # Snapshot Diff
//!
//! Structural comparison of two [`GraphSnapshot`]s.
//!
//! Nodes are matched by id and compared field by field (`labels` plus one
//! `properties.<key>` field per property). Edges have no identity beyond
//! their `from->to:label` key, so an edge whose properties changed shows
//! up as a removed/added pair. Metadata is a flat key comparison.
//!
//! A [`SnapshotDiffResult`] is pure data: [`SnapshotDiffResult::invert`]
//! yields the diff that undoes it, and [`GraphSnapshot::apply`] replays
//! one against a snapshot.

mod snapshot;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Edge, EdgeKey, Node, NodeId, Value};
use crate::{Error, Result};

pub use snapshot::GraphSnapshot;

// ============================================================================
// Result types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Removed,
    Added,
    Modified,
}

impl ChangeKind {
    fn inverted(self) -> Self {
        match self {
            ChangeKind::Added => ChangeKind::Removed,
            ChangeKind::Removed => ChangeKind::Added,
            ChangeKind::Modified => ChangeKind::Modified,
        }
    }

    fn symbol(self) -> char {
        match self {
            ChangeKind::Added => '+',
            ChangeKind::Removed => '-',
            ChangeKind::Modified => '~',
        }
    }
}

/// One differing field; `Null` stands for an absent property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiff {
    pub id: NodeId,
    pub kind: ChangeKind,
    /// The whole node for `added` (new state) and `removed` (old state).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    /// Field changes for `modified`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDiff {
    pub key: EdgeKey,
    pub kind: ChangeKind,
    pub edge: Edge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataChange {
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub nodes_added: usize,
    pub nodes_removed: usize,
    pub nodes_modified: usize,
    pub edges_added: usize,
    pub edges_removed: usize,
    pub metadata_changed: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.nodes_added
            + self.nodes_removed
            + self.nodes_modified
            + self.edges_added
            + self.edges_removed
            + self.metadata_changed
    }
}

/// Changes between two snapshots, ordered by node id, edge key and
/// metadata key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiffResult {
    pub from_version: String,
    pub to_version: String,
    pub nodes: Vec<NodeDiff>,
    pub edges: Vec<EdgeDiff>,
    pub metadata: Vec<MetadataChange>,
    pub summary: DiffSummary,
}

impl SnapshotDiffResult {
    /// Assemble a result, ordering the lists and deriving the counters.
    pub fn new(
        from_version: impl Into<String>,
        to_version: impl Into<String>,
        mut nodes: Vec<NodeDiff>,
        mut edges: Vec<EdgeDiff>,
        mut metadata: Vec<MetadataChange>,
    ) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id).then(a.kind.cmp(&b.kind)));
        edges.sort_by(|a, b| a.key.cmp(&b.key).then(a.kind.cmp(&b.kind)));
        metadata.sort_by(|a, b| a.key.cmp(&b.key));

        let count = |kind: ChangeKind| nodes.iter().filter(|d| d.kind == kind).count();
        let count_edges = |kind: ChangeKind| edges.iter().filter(|d| d.kind == kind).count();
        let summary = DiffSummary {
            nodes_added: count(ChangeKind::Added),
            nodes_removed: count(ChangeKind::Removed),
            nodes_modified: count(ChangeKind::Modified),
            edges_added: count_edges(ChangeKind::Added),
            edges_removed: count_edges(ChangeKind::Removed),
            metadata_changed: metadata.len(),
        };
        Self { from_version: from_version.into(), to_version: to_version.into(), nodes, edges, metadata, summary }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.metadata.is_empty()
    }

    /// The diff that undoes this one.
    pub fn invert(&self) -> SnapshotDiffResult {
        let nodes = self
            .nodes
            .iter()
            .map(|d| NodeDiff {
                id: d.id.clone(),
                kind: d.kind.inverted(),
                node: d.node.clone(),
                changes: d
                    .changes
                    .iter()
                    .map(|c| FieldChange { field: c.field.clone(), from: c.to.clone(), to: c.from.clone() })
                    .collect(),
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|d| EdgeDiff { key: d.key.clone(), kind: d.kind.inverted(), edge: d.edge.clone() })
            .collect();
        let metadata = self
            .metadata
            .iter()
            .map(|m| MetadataChange { key: m.key.clone(), old: m.new.clone(), new: m.old.clone() })
            .collect();
        SnapshotDiffResult::new(self.to_version.clone(), self.from_version.clone(), nodes, edges, metadata)
    }

    /// Plain-text rendering; identical diffs render identically.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SnapshotDiffResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "snapshot {} -> {}: no changes", self.from_version, self.to_version);
        }
        let s = &self.summary;
        writeln!(f, "snapshot {} -> {}", self.from_version, self.to_version)?;
        writeln!(f, "  nodes: +{} -{} ~{}", s.nodes_added, s.nodes_removed, s.nodes_modified)?;
        writeln!(f, "  edges: +{} -{}", s.edges_added, s.edges_removed)?;
        write!(f, "  metadata: {} changed", s.metadata_changed)?;

        for d in &self.nodes {
            write!(f, "\n  {} node {}", d.kind.symbol(), d.id)?;
            for c in &d.changes {
                write!(f, "\n      {}: {} -> {}", c.field, c.from, c.to)?;
            }
        }
        for d in &self.edges {
            write!(f, "\n  {} edge {}", d.kind.symbol(), d.key)?;
        }
        for m in &self.metadata {
            let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "(absent)".to_string(), Value::to_string);
            write!(f, "\n  ~ metadata {}: {} -> {}", m.key, show(&m.old), show(&m.new))?;
        }
        Ok(())
    }
}

// ============================================================================
// Configuration and comparators
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Property keys never reported as changes.
    pub ignore_fields: Vec<String>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { ignore_fields: vec!["_version".into(), "_updatedAt".into()] }
    }
}

/// Field-level comparison of two versions of the same node.
pub trait NodeComparator: Send + Sync {
    fn compare(&self, from: &Node, to: &Node, config: &DiffConfig) -> Vec<FieldChange>;
}

impl<F> NodeComparator for F
where
    F: Fn(&Node, &Node, &DiffConfig) -> Vec<FieldChange> + Send + Sync,
{
    fn compare(&self, from: &Node, to: &Node, config: &DiffConfig) -> Vec<FieldChange> {
        self(from, to, config)
    }
}

/// Compares labels (as a set) and every non-ignored property deeply.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparator;

impl NodeComparator for DefaultComparator {
    fn compare(&self, from: &Node, to: &Node, config: &DiffConfig) -> Vec<FieldChange> {
        let mut changes = Vec::new();

        let old_labels: BTreeSet<&String> = from.labels.iter().collect();
        let new_labels: BTreeSet<&String> = to.labels.iter().collect();
        if old_labels != new_labels {
            changes.push(FieldChange {
                field: "labels".into(),
                from: Value::from(from.labels.clone()),
                to: Value::from(to.labels.clone()),
            });
        }

        let keys: BTreeSet<&String> = from.properties.keys().chain(to.properties.keys()).collect();
        for key in keys {
            if config.ignore_fields.iter().any(|f| f == key) {
                continue;
            }
            let old = from.properties.get(key).unwrap_or(&Value::Null);
            let new = to.properties.get(key).unwrap_or(&Value::Null);
            if old != new {
                changes.push(FieldChange {
                    field: format!("properties.{key}"),
                    from: old.clone(),
                    to: new.clone(),
                });
            }
        }
        changes
    }
}

// ============================================================================
// SnapshotDiff
// ============================================================================

/// Computes diffs; comparators are chosen by the node's first label that
/// has one registered.
#[derive(Clone, Default)]
pub struct SnapshotDiff {
    config: DiffConfig,
    comparators: HashMap<String, Arc<dyn NodeComparator>>,
}

impl fmt::Debug for SnapshotDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels: Vec<_> = self.comparators.keys().collect();
        labels.sort();
        f.debug_struct("SnapshotDiff")
            .field("config", &self.config)
            .field("comparators", &labels)
            .finish()
    }
}

impl SnapshotDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DiffConfig) -> Self {
        Self { config, comparators: HashMap::new() }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Use `comparator` for nodes carrying `label`.
    pub fn with_comparator(mut self, label: impl Into<String>, comparator: impl NodeComparator + 'static) -> Self {
        self.comparators.insert(label.into(), Arc::new(comparator));
        self
    }

    fn comparator_for(&self, node: &Node) -> &dyn NodeComparator {
        node.labels
            .iter()
            .find_map(|l| self.comparators.get(l))
            .map_or(&DefaultComparator as &dyn NodeComparator, |c| c.as_ref())
    }

    pub fn compute(&self, from: &GraphSnapshot, to: &GraphSnapshot) -> Result<SnapshotDiffResult> {
        for (side, snapshot) in [("from", from), ("to", to)] {
            if snapshot.version.is_empty() {
                return Err(Error::InvalidSnapshot(format!("{side} snapshot has no version")));
            }
        }

        let nodes = self.diff_nodes(from, to);
        let edges = diff_edges(from, to);
        let metadata = diff_metadata(&from.metadata, &to.metadata);
        let result = SnapshotDiffResult::new(from.version.clone(), to.version.clone(), nodes, edges, metadata);
        debug!(
            from = %result.from_version,
            to = %result.to_version,
            changes = result.summary.total(),
            "computed snapshot diff"
        );
        Ok(result)
    }

    /// Diff two loosely shaped JSON snapshots.
    pub fn compute_json(&self, from: &serde_json::Value, to: &serde_json::Value) -> Result<SnapshotDiffResult> {
        let from = snapshot::from_json(from, "from")?;
        let to = snapshot::from_json(to, "to")?;
        self.compute(&from, &to)
    }

    fn diff_nodes(&self, from: &GraphSnapshot, to: &GraphSnapshot) -> Vec<NodeDiff> {
        let old: BTreeMap<&NodeId, &Node> = from.nodes.iter().map(|n| (&n.id, n)).collect();
        let new: BTreeMap<&NodeId, &Node> = to.nodes.iter().map(|n| (&n.id, n)).collect();
        let mut out = Vec::new();

        for (id, node) in &new {
            match old.get(id) {
                None => out.push(NodeDiff {
                    id: (*id).clone(),
                    kind: ChangeKind::Added,
                    node: Some((*node).clone()),
                    changes: Vec::new(),
                }),
                Some(before) => {
                    let changes = self.comparator_for(node).compare(before, node, &self.config);
                    if !changes.is_empty() {
                        out.push(NodeDiff { id: (*id).clone(), kind: ChangeKind::Modified, node: None, changes });
                    }
                }
            }
        }
        for (id, node) in &old {
            if !new.contains_key(id) {
                out.push(NodeDiff {
                    id: (*id).clone(),
                    kind: ChangeKind::Removed,
                    node: Some((*node).clone()),
                    changes: Vec::new(),
                });
            }
        }
        out
    }
}

fn diff_edges(from: &GraphSnapshot, to: &GraphSnapshot) -> Vec<EdgeDiff> {
    let old: BTreeMap<EdgeKey, &Edge> = from.edges.iter().map(|e| (e.key(), e)).collect();
    let new: BTreeMap<EdgeKey, &Edge> = to.edges.iter().map(|e| (e.key(), e)).collect();
    let mut out = Vec::new();

    for (key, edge) in &old {
        match new.get(key) {
            Some(after) if after.properties == edge.properties => {}
            _ => out.push(EdgeDiff { key: key.clone(), kind: ChangeKind::Removed, edge: (*edge).clone() }),
        }
    }
    for (key, edge) in &new {
        match old.get(key) {
            Some(before) if before.properties == edge.properties => {}
            _ => out.push(EdgeDiff { key: key.clone(), kind: ChangeKind::Added, edge: (*edge).clone() }),
        }
    }
    out
}

fn diff_metadata(old: &BTreeMap<String, Value>, new: &BTreeMap<String, Value>) -> Vec<MetadataChange> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let (before, after) = (old.get(key), new.get(key));
            (before != after).then(|| MetadataChange {
                key: key.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn before() -> GraphSnapshot {
        GraphSnapshot::new(
            "v1",
            vec![
                Node::new("a").with_labels(["Person"]).with_property("name", "Ada"),
                Node::new("b").with_labels(["Person"]),
            ],
            vec![Edge::new("a", "b", "KNOWS").with_property("since", 2020)],
        )
        .with_metadata("owner", "ops")
    }

    fn after() -> GraphSnapshot {
        GraphSnapshot::new(
            "v2",
            vec![
                Node::new("a")
                    .with_labels(["Person"])
                    .with_property("name", "Grace")
                    .with_property("_updatedAt", 5),
                Node::new("c"),
            ],
            vec![Edge::new("a", "c", "KNOWS")],
        )
        .with_metadata("owner", "dev")
        .with_metadata("region", "eu")
    }

    #[test]
    fn test_compute() {
        let diff = SnapshotDiff::new().compute(&before(), &after()).unwrap();
        assert_eq!(
            diff.summary,
            DiffSummary {
                nodes_added: 1,
                nodes_removed: 1,
                nodes_modified: 1,
                edges_added: 1,
                edges_removed: 1,
                metadata_changed: 2,
            }
        );
        assert_eq!(diff.nodes[0].id, NodeId::from("a"));
        assert_eq!(
            diff.nodes[0].changes,
            vec![FieldChange { field: "properties.name".into(), from: "Ada".into(), to: "Grace".into() }]
        );
        assert_eq!(diff.nodes[1].kind, ChangeKind::Removed);
        assert_eq!(diff.nodes[2].kind, ChangeKind::Added);
    }

    #[test]
    fn test_edge_property_change_is_replace() {
        let mut changed = before();
        changed.version = "v2".into();
        changed.edges[0].properties.insert("since".into(), Value::Int(2021));
        let diff = SnapshotDiff::new().compute(&before(), &changed).unwrap();
        let kinds: Vec<_> = diff.edges.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ChangeKind::Removed, ChangeKind::Added]);
        assert_eq!(diff.summary.nodes_modified, 0);
    }

    #[test]
    fn test_invert_and_apply() {
        let (v1, v2) = (before(), after());
        let diff = SnapshotDiff::new().compute(&v1, &v2).unwrap();
        assert_eq!(diff.invert().invert(), diff);

        let forward = v1.apply(&diff).unwrap();
        assert_eq!(forward.edges, v2.edges);
        assert_eq!(forward.metadata, v2.metadata);
        let restored = forward.apply(&diff.invert()).unwrap();
        assert_eq!(restored.version, "v1");
        assert_eq!(restored.edges, v1.edges);
        assert_eq!(restored.metadata, v1.metadata);
        assert_eq!(restored.node(&"a".into()).unwrap().get("name"), Some(&Value::from("Ada")));
        assert!(restored.node(&"b".into()).is_some());
        assert!(restored.node(&"c".into()).is_none());
    }

    #[test]
    fn test_custom_comparator() {
        let diff = SnapshotDiff::new()
            .with_comparator("Person", |_: &Node, _: &Node, _: &DiffConfig| Vec::<FieldChange>::new())
            .compute(&before(), &after())
            .unwrap();
        assert_eq!(diff.summary.nodes_modified, 0);
    }

    #[test]
    fn test_format_is_deterministic() {
        let diff = SnapshotDiff::new().compute(&before(), &after()).unwrap();
        let text = diff.format();
        assert_eq!(text, SnapshotDiff::new().compute(&before(), &after()).unwrap().to_string());
        assert!(text.starts_with("snapshot v1 -> v2\n  nodes: +1 -1 ~1"));
        assert!(text.contains("~ node a\n      properties.name: \"Ada\" -> \"Grace\""));
        assert!(text.contains("- edge a->b:KNOWS"));
        assert!(text.contains("~ metadata region: (absent) -> \"eu\""));

        let same = SnapshotDiff::new().compute(&before(), &before()).unwrap();
        assert!(same.is_empty());
        assert_eq!(same.format(), "snapshot v1 -> v1: no changes");
    }

    #[test]
    fn test_missing_version() {
        let mut bad = before();
        bad.version.clear();
        assert!(matches!(SnapshotDiff::new().compute(&bad, &after()), Err(Error::InvalidSnapshot(_))));
    }
}
