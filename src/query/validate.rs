//! Structural validation of plan trees.

use crate::Error;
use super::plan::{QueryNode, QueryStep, Selector, StepKind};

/// Traversals deeper than this are flagged as expensive.
const DEEP_TRAVERSAL: usize = 3;

/// Outcome of `QueryParser::validate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanValidation {
    pub errors: Vec<Error>,
    pub warnings: Vec<String>,
}

impl PlanValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walk the tree and report structural errors and coarse warnings.
pub fn validate(root: &QueryNode, max_depth: usize) -> PlanValidation {
    let mut report = PlanValidation::default();

    let depth = root.depth();
    if depth > max_depth {
        report.errors.push(Error::QueryTooDeep { depth, max: max_depth });
    }

    let mut has_filter = false;
    let mut has_limit = false;
    let mut has_sort = false;
    let mut scans_everything = false;

    root.walk(&mut |node, level| {
        let kind = node.kind();
        let at = |msg: String| Error::InvalidPlan(format!("{} step at depth {level}: {msg}", kind.as_str()));

        match (kind, node.children.len()) {
            (StepKind::Select, 0) => {}
            (StepKind::Select, n) => report.errors.push(at(format!("select must be a leaf, has {n} inputs"))),
            (_, 1) => {}
            (_, 0) => report.errors.push(at("missing input step".into())),
            (_, n) => report.errors.push(at(format!("expected exactly one input, has {n}"))),
        }

        match &node.step {
            QueryStep::Select(cfg) => match &cfg.selector {
                Selector::All => scans_everything = true,
                Selector::Ids(ids) if ids.is_empty() => report.errors.push(at("empty id list".into())),
                Selector::Criteria { labels, properties } if labels.is_empty() && properties.is_empty() => {
                    report.errors.push(at("empty criteria".into()))
                }
                Selector::Criteria { labels, .. } if labels.is_empty() => scans_everything = true,
                _ => {}
            },
            QueryStep::Traverse(cfg) => {
                if cfg.max_depth == 0 || cfg.min_depth > cfg.max_depth {
                    report.errors.push(at(format!(
                        "invalid depth range {}..{}",
                        cfg.min_depth, cfg.max_depth
                    )));
                }
                if cfg.max_depth > DEEP_TRAVERSAL {
                    report.warnings.push(format!(
                        "traverse depth {} may expand a large part of the graph",
                        cfg.max_depth
                    ));
                }
                if cfg.edge_type.is_none() {
                    report.warnings.push("traverse follows every edge type".into());
                }
                has_filter |= !cfg.filter.is_empty();
            }
            QueryStep::Filter(cfg) => {
                if cfg.conditions.is_empty() {
                    report.errors.push(at("no conditions".into()));
                }
                has_filter = true;
            }
            QueryStep::Aggregate(cfg) => {
                if cfg.aggregations.is_empty() {
                    report.errors.push(at("no aggregations".into()));
                }
            }
            QueryStep::Sort(cfg) => {
                if cfg.keys.is_empty() {
                    report.errors.push(at("no sort keys".into()));
                }
                has_sort = true;
            }
            QueryStep::Limit(_) => has_limit = true,
        }
    });

    if scans_everything && !has_filter {
        report.warnings.push("query scans every node without a filter".into());
    }
    if has_sort && !has_limit {
        report.warnings.push("sort without limit orders the full result set".into());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::*;

    fn select_all() -> QueryNode {
        QueryNode::new(QueryStep::Select(SelectConfig { selector: Selector::All }))
    }

    #[test]
    fn test_depth_cap() {
        let mut tree = select_all();
        for _ in 0..10 {
            tree = QueryNode::new(QueryStep::Limit(LimitConfig { count: 1 })).with_child(tree);
        }
        let report = validate(&tree, 10);
        assert!(report.errors.contains(&Error::QueryTooDeep { depth: 11, max: 10 }));
    }

    #[test]
    fn test_missing_input() {
        let tree = QueryNode::new(QueryStep::Limit(LimitConfig { count: 1 }));
        let report = validate(&tree, 10);
        assert!(!report.is_valid());
        assert!(matches!(&report.errors[0], Error::InvalidPlan(msg) if msg.contains("missing input")));
    }

    #[test]
    fn test_invalid_traverse_range() {
        let traverse = TraverseConfig { min_depth: 3, max_depth: 2, ..Default::default() };
        let tree = QueryNode::new(QueryStep::Traverse(traverse)).with_child(select_all());
        assert!(!validate(&tree, 10).is_valid());
    }

    #[test]
    fn test_full_scan_warning() {
        let report = validate(&select_all(), 10);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("scans every node")));
    }
}
