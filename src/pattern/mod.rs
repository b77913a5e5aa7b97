//! Cypher-style subgraph pattern matching.
//!
//! A [`PathPattern`] is a start [`NodePattern`] followed by
//! `(RelationshipPattern, NodePattern)` segments. Patterns are built with
//! the builder methods below or parsed from text:
//!
//! ```text
//! (p:Person {name: 'Alice'})-[r:KNOWS|LIKES *1..3]->(q)
//! ```

pub mod lexer;
pub mod matcher;
pub mod parser;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{Direction, Edge, Node, Path, PropertyMap, Value};
use crate::query::{CompiledRegex, Operator};
use crate::Result;

pub use matcher::{expand, Expansion, PatternMatcher};

// ============================================================================
// Constraints
// ============================================================================

/// `key <operator> value` on a node or edge property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConstraint {
    pub key: String,
    pub operator: Operator,
    pub value: Value,
    #[serde(skip)]
    regex: CompiledRegex,
}

impl PropertyConstraint {
    /// Equality constraint (deep, numeric-aware comparison).
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), operator: Operator::Eq, value: value.into(), regex: CompiledRegex::default() }
    }

    /// Operator constraint. Bad regex or string operands fail here.
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        operator.check_operand(&value)?;
        Ok(Self { key: key.into(), operator, value, regex: CompiledRegex::default() })
    }

    pub fn matches(&self, properties: &PropertyMap) -> bool {
        self.operator.evaluate_cached(properties.get(&self.key), &self.value, &self.regex)
    }
}

// ============================================================================
// Node / relationship / path patterns
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<PropertyConstraint>,
}

impl NodePattern {
    /// Anonymous `()`.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self { variable: Some(name.into()), ..Self::default() }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push(PropertyConstraint::eq(key, value));
        self
    }

    pub fn constraint(mut self, constraint: PropertyConstraint) -> Self {
        self.properties.push(constraint);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.labels.iter().all(|l| node.has_label(l))
            && self.properties.iter().all(|c| c.matches(&node.properties))
    }

    fn specificity(&self) -> f64 {
        2.0 * self.labels.len() as f64 + 1.5 * self.properties.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    /// Accepted edge labels; empty accepts any.
    pub types: Vec<String>,
    pub direction: Direction,
    pub properties: Vec<PropertyConstraint>,
    pub min_hops: Option<usize>,
    pub max_hops: Option<usize>,
}

impl Default for RelationshipPattern {
    fn default() -> Self {
        Self {
            variable: None,
            types: Vec::new(),
            direction: Direction::Outgoing,
            properties: Vec::new(),
            min_hops: None,
            max_hops: None,
        }
    }
}

impl RelationshipPattern {
    pub fn new(direction: Direction) -> Self {
        Self { direction, ..Self::default() }
    }

    pub fn outgoing() -> Self {
        Self::new(Direction::Outgoing)
    }

    pub fn incoming() -> Self {
        Self::new(Direction::Incoming)
    }

    pub fn both() -> Self {
        Self::new(Direction::Both)
    }

    pub fn var(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    pub fn edge_type(mut self, label: impl Into<String>) -> Self {
        self.types.push(label.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push(PropertyConstraint::eq(key, value));
        self
    }

    pub fn constraint(mut self, constraint: PropertyConstraint) -> Self {
        self.properties.push(constraint);
        self
    }

    /// Variable-length `*min..max`; `None` leaves a bound open.
    pub fn hops(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_hops = Some(min.unwrap_or(1));
        self.max_hops = max;
        self
    }

    pub fn is_variable_length(&self) -> bool {
        self.min_hops.is_some() || self.max_hops.is_some()
    }

    /// Inclusive hop range. Only an open upper bound is replaced by `cap`,
    /// and never below `min`.
    pub fn hop_range(&self, cap: usize) -> (usize, usize) {
        let min = self.min_hops.unwrap_or(1);
        let max = self.max_hops.unwrap_or_else(|| cap.max(min));
        (min, max)
    }

    pub fn matches_edge(&self, edge: &Edge) -> bool {
        (self.types.is_empty() || self.types.iter().any(|t| *t == edge.label))
            && self.properties.iter().all(|c| c.matches(&edge.properties))
    }

    fn specificity(&self) -> f64 {
        self.types.len() as f64 + 1.5 * self.properties.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPattern {
    pub start: NodePattern,
    pub segments: Vec<(RelationshipPattern, NodePattern)>,
}

impl PathPattern {
    pub fn new(start: NodePattern) -> Self {
        Self { start, segments: Vec::new() }
    }

    pub fn then(mut self, relationship: RelationshipPattern, node: NodePattern) -> Self {
        self.segments.push((relationship, node));
        self
    }

    /// Parse pattern text such as `(a:Person)-[:KNOWS*1..2]->(b)`.
    pub fn parse(text: &str) -> Result<Self> {
        parser::parse(text)
    }

    /// Named variables in pattern order, without duplicates.
    pub fn variables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let names = std::iter::once(self.start.variable.as_deref()).chain(
            self.segments
                .iter()
                .flat_map(|(rel, node)| [rel.variable.as_deref(), node.variable.as_deref()]),
        );
        for name in names.flatten() {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }

    pub(crate) fn specificity(&self) -> f64 {
        self.start.specificity()
            + self
                .segments
                .iter()
                .map(|(rel, node)| rel.specificity() + node.specificity())
                .sum::<f64>()
    }
}

// ============================================================================
// Results
// ============================================================================

/// What a pattern variable is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Binding {
    Node(Node),
    Edge(Edge),
    Path(Path),
}

impl Binding {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Binding::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Binding::Edge(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Binding::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Same graph element: node id, edge key or path element sequence.
    pub fn same_element(&self, other: &Binding) -> bool {
        match (self, other) {
            (Binding::Node(a), Binding::Node(b)) => a.id == b.id,
            (Binding::Edge(a), Binding::Edge(b)) => a.key() == b.key(),
            (Binding::Path(a), Binding::Path(b)) => {
                a.nodes.iter().map(|n| &n.id).eq(b.nodes.iter().map(|n| &n.id))
                    && a.edges.iter().map(Edge::key).eq(b.edges.iter().map(Edge::key))
            }
            _ => false,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Binding::Node(n) => n.to_value(),
            Binding::Edge(e) => e.to_value(),
            Binding::Path(p) => p.to_value(),
        }
    }
}

/// Variable → binding, in binding order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bindings(SmallVec<[(String, Binding); 4]>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, b)| b)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name`, replacing an earlier binding of the same name.
    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = binding,
            None => self.0.push((name, binding)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.insert(name, binding);
        self
    }

    /// Node id bound to `name`, if it is a node.
    pub fn node_id(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Binding::as_node).map(|n| n.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.0.iter().map(|(k, b)| (k.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` in; false when a shared name is bound differently.
    pub fn join(&mut self, other: &Bindings) -> bool {
        for (name, binding) in other.iter() {
            match self.get(name) {
                Some(existing) if !existing.same_element(binding) => return false,
                Some(_) => {}
                None => self.0.push((name.to_string(), binding.clone())),
            }
        }
        true
    }

    /// Map row `{variable: element}`.
    pub fn to_value(&self) -> Value {
        Value::Map(self.0.iter().map(|(k, b)| (k.clone(), b.to_value())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub bindings: Bindings,
    /// Ranking heuristic only; higher is more specific.
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    /// Pre-bound variables; later occurrences must agree with them.
    pub initial_bindings: Bindings,
}

impl MatchOptions {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn bind(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.initial_bindings.insert(name, binding);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Partial matches kept per segment before truncation.
    pub max_results_per_pattern: usize,
    /// Upper bound substituted for an open `*n..` hop range.
    pub max_var_length_hops: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { max_results_per_pattern: 10_000, max_var_length_hops: 10 }
    }
}
