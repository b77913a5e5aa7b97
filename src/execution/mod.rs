//! Query execution engine.
//!
//! Executes query plans against a StorageBackend. The plan is walked
//! from its leaf `select` up to the root; every step maps a row set to a
//! row set. Rows are `Value` maps (`{id, labels, properties}` for nodes).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::*;
use crate::pattern::{expand, MatcherConfig, RelationshipPattern};
use crate::query::filter::matches_all;
use crate::query::{
    AggregateConfig, AggregateOp, QueryPlan, QueryStep, SelectConfig, Selector, SortConfig, SortOrder,
    TraverseConfig,
};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Query execution result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub items: Vec<Value>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of node rows, in order.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().filter_map(row_id).collect()
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub steps_executed: u64,
    pub nodes_scanned: u64,
    pub edges_traversed: u64,
    pub execution_time_ms: u64,
}

/// Execute a (linear) query plan against a storage backend.
pub async fn execute<B: StorageBackend + ?Sized>(
    backend: &B,
    plan: &QueryPlan,
    matcher: &MatcherConfig,
) -> Result<QueryResult> {
    let started = Instant::now();
    let mut stats = ExecutionStats::default();
    let mut rows: Vec<Value> = Vec::new();

    for node in plan.linearize()? {
        rows = match &node.step {
            QueryStep::Select(cfg) => select(backend, cfg, &mut stats).await?,
            QueryStep::Traverse(cfg) => traverse(backend, cfg, rows, matcher, &mut stats).await?,
            QueryStep::Filter(cfg) => rows.into_iter().filter(|r| matches_all(&cfg.conditions, r)).collect(),
            QueryStep::Aggregate(cfg) => vec![aggregate(cfg, &rows)],
            QueryStep::Sort(cfg) => sort(cfg, rows),
            QueryStep::Limit(cfg) => {
                let mut rows = rows;
                rows.truncate(cfg.count);
                rows
            }
        };
        stats.steps_executed += 1;
        debug!(step = node.kind().as_str(), rows = rows.len(), "executed step");
    }

    stats.execution_time_ms = started.elapsed().as_millis() as u64;
    Ok(QueryResult { items: rows, stats })
}

fn row_id(row: &Value) -> Option<&str> {
    row.get_path("id").and_then(Value::as_str)
}

// ============================================================================
// select
// ============================================================================

async fn select<B: StorageBackend + ?Sized>(
    backend: &B,
    cfg: &SelectConfig,
    stats: &mut ExecutionStats,
) -> Result<Vec<Value>> {
    let nodes = match &cfg.selector {
        Selector::Id(id) => backend.get_node(id).await?.into_iter().collect(),
        Selector::Ids(ids) => {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                found.extend(backend.get_node(id).await?);
            }
            found
        }
        Selector::All => backend.all_nodes().await?,
        Selector::Label(label) => backend.nodes_by_label(label).await?,
        Selector::Criteria { labels, properties } => {
            let candidates = match labels.first() {
                Some(label) => backend.nodes_by_label(label).await?,
                None => backend.all_nodes().await?,
            };
            stats.nodes_scanned += candidates.len() as u64;
            let matched: Vec<Value> = candidates
                .into_iter()
                .filter(|n| labels.iter().all(|l| n.has_label(l)))
                .filter(|n| properties.iter().all(|(k, v)| n.get(k).is_some_and(|actual| actual.loose_eq(v))))
                .map(|n| n.to_value())
                .collect();
            return Ok(matched);
        }
    };
    stats.nodes_scanned += nodes.len() as u64;
    Ok(nodes.iter().map(Node::to_value).collect())
}

// ============================================================================
// traverse
// ============================================================================

async fn traverse<B: StorageBackend + ?Sized>(
    backend: &B,
    cfg: &TraverseConfig,
    rows: Vec<Value>,
    matcher: &MatcherConfig,
    stats: &mut ExecutionStats,
) -> Result<Vec<Value>> {
    let rel = RelationshipPattern {
        types: cfg.edge_type.iter().cloned().collect(),
        ..RelationshipPattern::new(cfg.direction)
    }
    .hops(Some(cfg.min_depth), Some(cfg.max_depth));
    let (min, max) = rel.hop_range(matcher.max_var_length_hops);

    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut out = Vec::new();
    for row in &rows {
        let id = row_id(row).ok_or_else(|| {
            Error::InvalidPlan(format!("traverse input row has no node id: {row}"))
        })?;
        let Some(start) = backend.get_node(&NodeId::from(id)).await? else { continue };

        let expansion = expand(backend, &start, &rel, min, max, matcher.max_results_per_pattern).await?;
        stats.edges_traversed += expansion.edges_examined as u64;
        for path in expansion.paths {
            let Some(reached) = path.end() else { continue };
            let candidate = reached.to_value();
            if matches_all(&cfg.filter, &candidate) && seen.insert(reached.id.clone()) {
                out.push(candidate);
            }
        }
    }
    Ok(out)
}

// ============================================================================
// aggregate / sort
// ============================================================================

fn aggregate(cfg: &AggregateConfig, rows: &[Value]) -> Value {
    let mut out = PropertyMap::with_capacity(cfg.aggregations.len());
    for agg in &cfg.aggregations {
        let values: Vec<&Value> = rows
            .iter()
            .filter_map(|r| r.lookup(&agg.field))
            .filter(|v| !v.is_null())
            .collect();

        let result = match agg.op {
            AggregateOp::Count if agg.field == "*" => Value::from(rows.len()),
            AggregateOp::Count => Value::from(values.len()),
            AggregateOp::Sum => sum(&values),
            AggregateOp::Avg => {
                let nums: Vec<f64> = values.iter().filter_map(|v| v.as_float()).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            AggregateOp::Min => extreme(&values, Ordering::Less),
            AggregateOp::Max => extreme(&values, Ordering::Greater),
            AggregateOp::First => rows.first().and_then(|r| r.lookup(&agg.field)).cloned().unwrap_or(Value::Null),
            AggregateOp::Last => rows.last().and_then(|r| r.lookup(&agg.field)).cloned().unwrap_or(Value::Null),
        };
        out.insert(agg.alias.clone(), result);
    }
    Value::Map(out)
}

/// Integer sum while every operand is an integer and the total fits in
/// an `i64`, float otherwise.
fn sum(values: &[&Value]) -> Value {
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let total = values
            .iter()
            .filter_map(|v| v.as_int())
            .try_fold(0i64, |acc, n| acc.checked_add(n));
        if let Some(total) = total {
            return Value::Int(total);
        }
    }
    Value::Float(values.iter().filter_map(|v| v.as_float()).sum())
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    values
        .iter()
        .copied()
        .reduce(|best, v| if v.compare(best) == Some(wanted) { v } else { best })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Stable multi-key sort; nulls last in both directions.
fn sort(cfg: &SortConfig, mut rows: Vec<Value>) -> Vec<Value> {
    rows.sort_by(|a, b| {
        for key in &cfg.keys {
            let left = a.lookup(&key.field).unwrap_or(&Value::Null);
            let right = b.lookup(&key.field).unwrap_or(&Value::Null);
            let ord = match (key.order, left.is_null() || right.is_null()) {
                (SortOrder::Desc, false) => left.sort_cmp(right).reverse(),
                _ => left.sort_cmp(right),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    rows
}
