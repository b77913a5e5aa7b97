//! Path: a sequence of alternating nodes and edges.

use serde::{Deserialize, Serialize};
use super::{props, Edge, Node, Value};

/// A path in the graph: node -[edge]-> node -[edge]-> node ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Nodes along the path. Always has one more element than `edges`.
    pub nodes: Vec<Node>,
    /// Edges connecting consecutive nodes.
    pub edges: Vec<Edge>,
}

impl Path {
    pub fn single(node: Node) -> Self {
        Self { nodes: vec![node], edges: Vec::new() }
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn end(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Extend path with an edge and the node it leads to.
    pub fn append(&mut self, edge: Edge, node: Node) {
        self.edges.push(edge);
        self.nodes.push(node);
    }

    pub fn to_value(&self) -> Value {
        Value::Map(props([
            ("nodes", Value::List(self.nodes.iter().map(Node::to_value).collect())),
            ("edges", Value::List(self.edges.iter().map(Edge::to_value).collect())),
        ]))
    }
}
