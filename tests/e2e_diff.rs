//! End-to-end tests for snapshot capture and diffing.

use std::collections::BTreeMap;

use graph_engine::diff::ChangeKind;
use graph_engine::{
    Edge, Engine, Error, GraphSnapshot, Node, SnapshotDiff, SnapshotDiffResult, StorageBackend, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Generators
// ============================================================================

type NodeSpec = (Vec<&'static str>, BTreeMap<String, i64>);
type EdgeSpec = (u8, u8, &'static str);

fn arb_snapshot(version: &'static str) -> impl Strategy<Value = GraphSnapshot> {
    let node = (
        prop::sample::subsequence(vec!["Item", "Person"], 0..=2),
        prop::collection::btree_map("[a-c]", 0i64..3, 0..3),
    );
    let edges = prop::collection::btree_map(
        (0u8..5, 0u8..5, prop::sample::select(vec!["KNOWS", "LIKES"])),
        prop::option::of(0i64..3),
        0..6,
    );
    let metadata = prop::collection::btree_map("[xy]", 0i64..3, 0..2);

    (prop::collection::btree_map(0u8..5, node, 0..5), edges, metadata).prop_map(
        move |(nodes, edges, metadata): (BTreeMap<u8, NodeSpec>, BTreeMap<EdgeSpec, Option<i64>>, BTreeMap<String, i64>)| {
            let nodes = nodes
                .into_iter()
                .map(|(id, (labels, props))| {
                    let mut node = Node::new(format!("n{id}")).with_labels(labels);
                    for (k, v) in props {
                        node = node.with_property(k, v);
                    }
                    node
                })
                .collect();
            let edges = edges
                .into_iter()
                .map(|((from, to, label), weight)| {
                    let edge = Edge::new(format!("n{from}"), format!("n{to}"), label);
                    match weight {
                        Some(w) => edge.with_property("w", w),
                        None => edge,
                    }
                })
                .collect();
            let mut snapshot = GraphSnapshot::new(version, nodes, edges);
            snapshot.metadata = metadata.into_iter().map(|(k, v)| (k, Value::Int(v))).collect();
            snapshot
        },
    )
}

fn assert_same_content(a: &GraphSnapshot, b: &GraphSnapshot) {
    assert_eq!(a.nodes, b.nodes);
    assert_eq!(a.edges, b.edges);
    assert_eq!(a.metadata, b.metadata);
}

fn assert_counters(diff: &SnapshotDiffResult) {
    let count = |kind: ChangeKind| diff.nodes.iter().filter(|d| d.kind == kind).count();
    assert_eq!(diff.summary.nodes_added, count(ChangeKind::Added));
    assert_eq!(diff.summary.nodes_removed, count(ChangeKind::Removed));
    assert_eq!(diff.summary.nodes_modified, count(ChangeKind::Modified));
    assert_eq!(diff.summary.edges_added + diff.summary.edges_removed, diff.edges.len());
    assert_eq!(diff.summary.metadata_changed, diff.metadata.len());
}

// ============================================================================
// 1. Invertibility
// ============================================================================

proptest! {
    #[test]
    fn prop_invert_is_an_involution(from in arb_snapshot("v1"), to in arb_snapshot("v2")) {
        let diff = SnapshotDiff::new().compute(&from, &to).unwrap();
        prop_assert_eq!(diff.invert().invert(), diff.clone());
        assert_counters(&diff);
        assert_counters(&diff.invert());
    }

    #[test]
    fn prop_apply_then_invert_restores(from in arb_snapshot("v1"), to in arb_snapshot("v2")) {
        let diff = SnapshotDiff::new().compute(&from, &to).unwrap();

        let forward = from.apply(&diff).unwrap();
        prop_assert_eq!(&forward.version, "v2");
        assert_same_content(&forward, &to);

        let back = forward.apply(&diff.invert()).unwrap();
        prop_assert_eq!(&back.version, "v1");
        assert_same_content(&back, &from);
    }

    #[test]
    fn prop_self_diff_is_empty(snapshot in arb_snapshot("v1")) {
        let diff = SnapshotDiff::new().compute(&snapshot, &snapshot).unwrap();
        prop_assert!(diff.is_empty());
        prop_assert_eq!(diff.summary.total(), 0);
    }
}

// ============================================================================
// 2. Capture around a transaction
// ============================================================================

#[tokio::test]
async fn test_diff_across_transaction() {
    let engine = Engine::open_memory().await.unwrap();
    engine.backend().add_node(Node::new("a").with_property("n", 1)).await.unwrap();
    engine.backend().add_node(Node::new("b")).await.unwrap();
    let before = engine.snapshot("1").await.unwrap();

    let tx = engine.begin().await.unwrap();
    tx.update_node("a", graph_engine::props([("n", 2)])).await.unwrap();
    tx.add_node(Node::new("c")).await.unwrap();
    tx.add_edge(Edge::new("a", "c", "LINK")).await.unwrap();
    tx.remove_node("b").await.unwrap();
    tx.commit().await.unwrap();
    let after = engine.snapshot("2").await.unwrap();

    let diff = engine.diff(&before, &after).unwrap();
    assert_eq!(diff.summary.nodes_added, 1);
    assert_eq!(diff.summary.nodes_removed, 1);
    assert_eq!(diff.summary.nodes_modified, 1);
    assert_eq!(diff.summary.edges_added, 1);
    assert_eq!(
        diff.format(),
        [
            "snapshot 1 -> 2",
            "  nodes: +1 -1 ~1",
            "  edges: +1 -0",
            "  metadata: 0 changed",
            "  ~ node a",
            "      properties.n: 1 -> 2",
            "  - node b",
            "  + node c",
            "  + edge a->c:LINK",
        ]
        .join("\n")
    );
}

// ============================================================================
// 3. Untyped snapshots
// ============================================================================

#[test]
fn test_compute_json() {
    let from = json!({
        "version": "2024-01",
        "nodes": [{"id": "a", "labels": ["Doc"], "properties": {"title": "draft", "_updatedAt": 1}}],
        "edges": []
    });
    let to = json!({
        "version": "2024-02",
        "nodes": [{"id": "a", "labels": ["Doc"], "properties": {"title": "final", "_updatedAt": 2}}],
        "edges": [],
        "metadata": {"author": "kim"}
    });
    let diff = SnapshotDiff::new().compute_json(&from, &to).unwrap();
    assert_eq!(diff.nodes.len(), 1);
    assert_eq!(diff.nodes[0].changes.len(), 1);
    assert_eq!(diff.nodes[0].changes[0].field, "properties.title");
    assert_eq!(diff.metadata[0].new, Some(Value::from("kim")));

    let missing_edges = json!({"version": "x", "nodes": []});
    assert!(matches!(
        SnapshotDiff::new().compute_json(&missing_edges, &to),
        Err(Error::InvalidSnapshot(_))
    ));
}
