//! Query plan tree.
//!
//! A plan is a tree of typed steps. Children execute before their parent
//! and feed it; a parsed plan is a linear chain
//! `limit(sort(aggregate(filter(traverse(select)))))` with every optional
//! step left out when the DSL omits it.

use serde::{Deserialize, Serialize};

use crate::index::IndexHint;
use crate::model::{Direction, NodeId, PropertyMap};
use crate::planner::{PlanStep, StepGraph};
use super::filter::FilterExpr;
use crate::{Error, Result};

/// Discriminant of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Select,
    Traverse,
    Filter,
    Aggregate,
    Sort,
    Limit,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Select => "select",
            StepKind::Traverse => "traverse",
            StepKind::Filter => "filter",
            StepKind::Aggregate => "aggregate",
            StepKind::Sort => "sort",
            StepKind::Limit => "limit",
        }
    }
}

/// What a `select` step starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// A single node id.
    Id(NodeId),
    /// Several node ids, in order.
    Ids(Vec<NodeId>),
    /// Every node (`"*"`).
    All,
    /// Every node carrying a label (`"label:Person"`).
    Label(String),
    /// Label and/or property equality criteria.
    Criteria {
        labels: Vec<String>,
        properties: PropertyMap,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectConfig {
    pub selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverseConfig {
    pub direction: Direction,
    /// `None` follows every edge type (`"*"`).
    pub edge_type: Option<String>,
    pub min_depth: usize,
    pub max_depth: usize,
    /// Conditions on reached nodes (implicit AND).
    pub filter: Vec<FilterExpr>,
}

impl Default for TraverseConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Outgoing,
            edge_type: None,
            min_depth: 1,
            max_depth: 1,
            filter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Conditions (implicit AND).
    pub conditions: Vec<FilterExpr>,
}

/// Aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
}

impl AggregateOp {
    pub fn parse(field: &str, name: &str) -> Result<Self> {
        Ok(match name {
            "count" => AggregateOp::Count,
            "sum" => AggregateOp::Sum,
            "avg" => AggregateOp::Avg,
            "min" => AggregateOp::Min,
            "max" => AggregateOp::Max,
            "first" => AggregateOp::First,
            "last" => AggregateOp::Last,
            other => {
                return Err(Error::UnknownAggregation {
                    field: field.to_string(),
                    op: other.to_string(),
                })
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::First => "first",
            AggregateOp::Last => "last",
        }
    }
}

/// One output column of an aggregate step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub field: String,
    pub op: AggregateOp,
    /// Output key.
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub count: usize,
}

/// A plan step with its kind-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum QueryStep {
    Select(SelectConfig),
    Traverse(TraverseConfig),
    Filter(FilterConfig),
    Aggregate(AggregateConfig),
    Sort(SortConfig),
    Limit(LimitConfig),
}

impl QueryStep {
    pub fn kind(&self) -> StepKind {
        match self {
            QueryStep::Select(_) => StepKind::Select,
            QueryStep::Traverse(_) => StepKind::Traverse,
            QueryStep::Filter(_) => StepKind::Filter,
            QueryStep::Aggregate(_) => StepKind::Aggregate,
            QueryStep::Sort(_) => StepKind::Sort,
            QueryStep::Limit(_) => StepKind::Limit,
        }
    }
}

/// A node of the plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryNode {
    pub step: QueryStep,
    #[serde(default)]
    pub children: Vec<QueryNode>,
}

impl QueryNode {
    pub fn new(step: QueryStep) -> Self {
        Self { step, children: Vec::new() }
    }

    /// Wrap `child` as this step's input.
    pub fn with_child(mut self, child: QueryNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn kind(&self) -> StepKind {
        self.step.kind()
    }

    /// Number of levels, counting this node.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(QueryNode::depth).max().unwrap_or(0)
    }

    /// The sole input of a non-leaf step.
    pub fn sole_child(&self) -> Option<&QueryNode> {
        match self.children.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Pre-order walk.
    pub fn walk(&self, visit: &mut impl FnMut(&QueryNode, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at(&self, level: usize, visit: &mut impl FnMut(&QueryNode, usize)) {
        visit(self, level);
        for child in &self.children {
            child.walk_at(level + 1, visit);
        }
    }
}

/// A parsed (and possibly optimized) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub root: QueryNode,
    pub estimated_cost: f64,
    pub indexes: Vec<IndexHint>,
}

impl QueryPlan {
    /// Steps from the leaf up to the root, for linear plans.
    ///
    /// Fails when a step has more than one input.
    pub fn linearize(&self) -> Result<Vec<&QueryNode>> {
        let mut chain = Vec::new();
        let mut current = &self.root;
        loop {
            chain.push(current);
            match current.children.as_slice() {
                [] => break,
                [only] => current = only,
                many => {
                    return Err(Error::InvalidPlan(format!(
                        "{} step has {} inputs; only linear plans execute",
                        current.kind().as_str(),
                        many.len()
                    )))
                }
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Lower the tree to the stage optimizer's step list.
    ///
    /// Step ids are `"{preorder index}:{kind}"`; each step depends on its
    /// children and costs its own incremental estimate.
    pub fn to_step_graph(&self) -> StepGraph {
        let mut steps = Vec::new();
        lower(&self.root, &mut steps);
        StepGraph { steps }
    }
}

fn lower(node: &QueryNode, steps: &mut Vec<PlanStep>) -> String {
    let slot = steps.len();
    let id = format!("{slot}:{}", node.kind().as_str());
    steps.push(PlanStep::new(id.clone(), super::cost::step_cost(node)));
    let deps: Vec<String> = node.children.iter().map(|child| lower(child, steps)).collect();
    steps[slot].depends_on = deps;
    id
}
