//! Edge in the property graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use super::{NodeId, PropertyMap, Value};

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "out")]
    Outgoing,
    #[serde(rename = "in")]
    Incoming,
    #[serde(rename = "both")]
    Both,
}

impl Direction {
    /// Parse the DSL spelling (`out`, `in`, `both`; long forms accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "out" | "outgoing" => Some(Direction::Outgoing),
            "in" | "incoming" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "out",
            Direction::Incoming => "in",
            Direction::Both => "both",
        }
    }
}

/// Composite edge identity: edges carry no id of their own, so
/// `(from, to, label)` is the key across storage and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeId,
    pub to: NodeId,
    pub label: String,
}

impl EdgeKey {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, label: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), label: label.into() }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}:{}", self.from, self.to, self.label)
    }
}

/// A directed, typed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub label: String,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, label: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from.clone(),
            to: self.to.clone(),
            label: self.label.clone(),
        }
    }

    /// The "other" end of the edge from the given node.
    pub fn other_node(&self, from: &NodeId) -> Option<&NodeId> {
        if *from == self.from { Some(&self.to) }
        else if *from == self.to { Some(&self.from) }
        else { None }
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        self.from == *node || self.to == *node
    }

    pub fn to_value(&self) -> Value {
        let mut row = HashMap::with_capacity(4);
        row.insert("from".to_string(), Value::String(self.from.0.clone()));
        row.insert("to".to_string(), Value::String(self.to.0.clone()));
        row.insert("label".to_string(), Value::String(self.label.clone()));
        row.insert("properties".to_string(), Value::Map(self.properties.clone()));
        Value::Map(row)
    }
}
