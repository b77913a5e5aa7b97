//! Tree rewrites applied by `QueryParser::optimize`.
//!
//! Rules, applied bottom-up until nothing changes:
//! 1. `filter(traverse(x))` → `traverse(x)` with the filter's conditions
//!    appended to the traverse step's own filter.
//! 2. `filter(filter(x))` → `filter(x)` with concatenated conditions.
//! 3. `sort(limit(x))` → `limit(sort(x))`.

use tracing::debug;

use super::plan::{QueryNode, QueryStep};

/// Rewrite a tree in place until it reaches a fixpoint.
pub fn rewrite(node: &mut QueryNode) {
    for child in &mut node.children {
        rewrite(child);
    }
    while apply_once(node) {
        for child in &mut node.children {
            rewrite(child);
        }
    }
}

/// Try each rule at `node`; true when the tree changed.
fn apply_once(node: &mut QueryNode) -> bool {
    push_filter_into_traverse(node) || merge_filters(node) || swap_sort_limit(node)
}

fn push_filter_into_traverse(node: &mut QueryNode) -> bool {
    let QueryStep::Filter(filter) = &node.step else { return false };
    let Some(QueryStep::Traverse(_)) = node.sole_child().map(|c| &c.step) else { return false };

    let conditions = filter.conditions.clone();
    let mut traverse = node.children.remove(0);
    if let QueryStep::Traverse(cfg) = &mut traverse.step {
        debug!(conditions = conditions.len(), "pushing filter into traverse");
        cfg.filter.extend(conditions);
    }
    *node = traverse;
    true
}

fn merge_filters(node: &mut QueryNode) -> bool {
    let QueryStep::Filter(_) = &node.step else { return false };
    let Some(QueryStep::Filter(_)) = node.sole_child().map(|c| &c.step) else { return false };

    let inner = node.children.remove(0);
    if let (QueryStep::Filter(outer), QueryStep::Filter(inner_cfg)) = (&mut node.step, inner.step) {
        debug!("merging nested filters");
        let mut merged = inner_cfg.conditions;
        merged.append(&mut outer.conditions);
        outer.conditions = merged;
    }
    node.children = inner.children;
    true
}

fn swap_sort_limit(node: &mut QueryNode) -> bool {
    let QueryStep::Sort(_) = &node.step else { return false };
    let Some(QueryStep::Limit(_)) = node.sole_child().map(|c| &c.step) else { return false };

    let mut limit = node.children.remove(0);
    let grandchildren = std::mem::take(&mut limit.children);
    node.children = grandchildren;
    let sort = std::mem::replace(node, limit);
    debug!("moving limit above sort");
    node.children = vec![sort];
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::{Condition, FilterExpr};
    use crate::query::operator::Operator;
    use crate::query::plan::*;

    fn select(id: &str) -> QueryNode {
        QueryNode::new(QueryStep::Select(SelectConfig { selector: Selector::Id(id.into()) }))
    }

    fn filter(field: &str, value: i64) -> QueryNode {
        QueryNode::new(QueryStep::Filter(FilterConfig {
            conditions: vec![Condition::new(field, Operator::Gt, value).into()],
        }))
    }

    #[test]
    fn test_pushdown_into_traverse() {
        let mut tree = filter("age", 18)
            .with_child(QueryNode::new(QueryStep::Traverse(TraverseConfig::default())).with_child(select("a")));
        rewrite(&mut tree);

        assert_eq!(tree.kind(), StepKind::Traverse);
        let QueryStep::Traverse(cfg) = &tree.step else { unreachable!() };
        assert_eq!(cfg.filter, vec![FilterExpr::from(Condition::new("age", Operator::Gt, 18))]);
        assert_eq!(tree.children[0].kind(), StepKind::Select);
    }

    #[test]
    fn test_merge_nested_filters() {
        let mut tree = filter("a", 1).with_child(filter("b", 2).with_child(select("x")));
        rewrite(&mut tree);

        let QueryStep::Filter(cfg) = &tree.step else { panic!("expected filter") };
        let fields: Vec<&str> = cfg
            .conditions
            .iter()
            .flat_map(|f| f.conditions())
            .map(|c| c.field.as_str())
            .collect();
        assert_eq!(fields, vec!["b", "a"]);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_three_filters_then_traverse_collapse() {
        let mut tree = filter("a", 1).with_child(
            filter("b", 2).with_child(
                QueryNode::new(QueryStep::Traverse(TraverseConfig::default())).with_child(select("x")),
            ),
        );
        rewrite(&mut tree);
        assert_eq!(tree.kind(), StepKind::Traverse);
        let QueryStep::Traverse(cfg) = &tree.step else { unreachable!() };
        assert_eq!(cfg.filter.len(), 2);
    }

    #[test]
    fn test_sort_over_limit_swapped() {
        let sort = QueryNode::new(QueryStep::Sort(SortConfig {
            keys: vec![SortKey { field: "age".into(), order: SortOrder::Asc }],
        }));
        let limit = QueryNode::new(QueryStep::Limit(LimitConfig { count: 3 }));
        let mut tree = sort.with_child(limit.with_child(select("a")));
        rewrite(&mut tree);

        assert_eq!(tree.kind(), StepKind::Limit);
        assert_eq!(tree.children[0].kind(), StepKind::Sort);
        assert_eq!(tree.children[0].children[0].kind(), StepKind::Select);
    }
}
