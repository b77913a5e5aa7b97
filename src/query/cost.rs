//! Cardinality-based cost heuristics and index hints.

use std::collections::BTreeSet;

use crate::index::{IndexHint, IndexType};
use super::plan::{QueryNode, QueryStep, Selector};

/// Assumed rows for an unrestricted scan.
const SCAN_ROWS: f64 = 1000.0;
/// Assumed rows behind a label lookup.
const LABEL_ROWS: f64 = 100.0;
/// Assumed fan-out per traversal hop.
const FANOUT: f64 = 5.0;
/// Assumed selectivity of one filter step.
const SELECTIVITY: f64 = 0.5;

/// Estimated `(rows, cost)` produced by a subtree.
pub fn estimate(node: &QueryNode) -> (f64, f64) {
    let input = node.children.iter().map(estimate).fold((0.0, 0.0), |acc, (rows, cost)| {
        (acc.0 + rows, acc.1 + cost)
    });
    let (rows, own) = own_estimate(node, input.0);
    (rows, input.1 + own)
}

/// Cost of a step on its own, given the estimated rows of its input.
pub fn step_cost(node: &QueryNode) -> f64 {
    let input_rows: f64 = node.children.iter().map(|c| estimate(c).0).sum();
    own_estimate(node, input_rows).1
}

fn own_estimate(node: &QueryNode, input_rows: f64) -> (f64, f64) {
    match &node.step {
        QueryStep::Select(cfg) => {
            let rows = match &cfg.selector {
                Selector::Id(_) => 1.0,
                Selector::Ids(ids) => ids.len() as f64,
                Selector::Label(_) => LABEL_ROWS,
                Selector::Criteria { labels, .. } if !labels.is_empty() => LABEL_ROWS,
                Selector::Criteria { .. } | Selector::All => SCAN_ROWS,
            };
            (rows, rows)
        }
        QueryStep::Traverse(cfg) => {
            let hops = i32::try_from(cfg.max_depth.max(1)).unwrap_or(i32::MAX);
            let mut rows = input_rows * FANOUT.powi(hops);
            if !cfg.filter.is_empty() {
                rows *= SELECTIVITY;
            }
            (rows, input_rows * FANOUT.powi(hops))
        }
        QueryStep::Filter(_) => (input_rows * SELECTIVITY, input_rows),
        QueryStep::Aggregate(_) => (1.0, input_rows),
        QueryStep::Sort(_) => {
            let n = input_rows.max(1.0);
            (input_rows, n * n.log2().max(1.0))
        }
        QueryStep::Limit(cfg) => (input_rows.min(cfg.count as f64), 1.0),
    }
}

/// Index names that would help this plan. Advisory only.
pub fn required_indexes(root: &QueryNode) -> Vec<IndexHint> {
    let mut hints = BTreeSet::new();
    root.walk(&mut |node, _| match &node.step {
        QueryStep::Select(cfg) => match &cfg.selector {
            Selector::Label(label) => {
                hints.insert(IndexHint::new(IndexType::Label, label));
            }
            Selector::Criteria { labels, properties } => {
                for label in labels {
                    hints.insert(IndexHint::new(IndexType::Label, label));
                }
                for key in properties.keys() {
                    hints.insert(IndexHint::new(IndexType::Property, key));
                }
            }
            _ => {}
        },
        QueryStep::Traverse(cfg) => {
            if let Some(edge_type) = &cfg.edge_type {
                hints.insert(IndexHint::new(IndexType::EdgeType, edge_type));
            }
            for filter in &cfg.filter {
                for cond in filter.conditions() {
                    hints.insert(condition_hint(cond));
                }
            }
        }
        QueryStep::Filter(cfg) => {
            for filter in &cfg.conditions {
                for cond in filter.conditions() {
                    hints.insert(condition_hint(cond));
                }
            }
        }
        QueryStep::Sort(cfg) => {
            for key in &cfg.keys {
                hints.insert(IndexHint::new(IndexType::Sort, &key.field));
            }
        }
        QueryStep::Aggregate(_) | QueryStep::Limit(_) => {}
    });
    hints.into_iter().collect()
}

fn condition_hint(cond: &super::filter::Condition) -> IndexHint {
    if cond.operator.is_textual() {
        IndexHint::new(IndexType::FullText, &cond.field)
    } else {
        IndexHint::new(IndexType::Property, &cond.field)
    }
}
