//! Declarative query DSL → plan tree.
//!
//! ```text
//! {select, traverse?, filter?, aggregate?, sort?, limit?}
//!        │
//!        ▼ parse
//!   QueryPlan { root: limit(sort(aggregate(filter(traverse(select))))) }
//!        │
//!        ▼ optimize (pure rewrite on a copy)
//!   QueryPlan { root: limit(sort(traverse[filter](select))) }
//! ```

pub mod cost;
pub mod filter;
pub mod operator;
pub mod parser;
pub mod plan;
pub mod rewrite;
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::{Error, Result};

pub use filter::{Condition, FilterExpr};
pub use operator::{CompiledRegex, Operator};
pub use plan::{
    AggregateConfig, AggregateOp, Aggregation, FilterConfig, LimitConfig, QueryNode, QueryPlan,
    QueryStep, SelectConfig, Selector, SortConfig, SortKey, SortOrder, StepKind, TraverseConfig,
};
pub use validate::PlanValidation;

/// Parser limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Deepest plan tree `validate` accepts.
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_depth: 10 }
    }
}

/// Builds, rewrites and checks query plans. Holds no graph state.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    config: ParserConfig,
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse a DSL record into a plan with cost and index hints filled in.
    pub fn parse(&self, dsl: &Json) -> Result<QueryPlan> {
        let root = parser::build_tree(dsl)?;
        let plan = finish(root);
        debug!(
            root = plan.root.kind().as_str(),
            depth = plan.root.depth(),
            cost = plan.estimated_cost,
            "parsed query"
        );
        Ok(plan)
    }

    /// Parse DSL given as JSON text.
    pub fn parse_str(&self, text: &str) -> Result<QueryPlan> {
        let dsl: Json = serde_json::from_str(text)
            .map_err(|e| Error::InvalidQuery(format!("query is not valid JSON: {e}")))?;
        self.parse(&dsl)
    }

    /// Rewrite a copy of `plan`; the input is left untouched.
    pub fn optimize(&self, plan: &QueryPlan) -> QueryPlan {
        let mut root = plan.root.clone();
        rewrite::rewrite(&mut root);
        let optimized = finish(root);
        debug!(
            before = plan.estimated_cost,
            after = optimized.estimated_cost,
            "optimized query plan"
        );
        optimized
    }

    pub fn validate(&self, plan: &QueryPlan) -> PlanValidation {
        validate::validate(&plan.root, self.config.max_depth)
    }
}

fn finish(root: plan::QueryNode) -> QueryPlan {
    let (_, estimated_cost) = cost::estimate(&root);
    let indexes = cost::required_indexes(&root);
    QueryPlan { root, estimated_cost, indexes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_optimize_pushes_filter_into_traverse() {
        let parser = QueryParser::new();
        let plan = parser
            .parse(&json!({
                "select": "a",
                "traverse": {"direction": "out"},
                "filter": {"age": {"$gt": 18}}
            }))
            .unwrap();
        assert_eq!(plan.root.kind(), StepKind::Filter);

        let optimized = parser.optimize(&plan);
        assert_eq!(optimized.root.kind(), StepKind::Traverse);
        let QueryStep::Traverse(cfg) = &optimized.root.step else { unreachable!() };
        assert_eq!(cfg.filter, vec![FilterExpr::from(Condition::new("age", Operator::Gt, 18))]);

        let mut kinds = Vec::new();
        optimized.root.walk(&mut |n, _| kinds.push(n.kind()));
        assert!(!kinds.contains(&StepKind::Filter));

        // original untouched
        assert_eq!(plan.root.kind(), StepKind::Filter);
    }

    #[test]
    fn test_condition_serializes_flat() {
        let cond = Condition::new("age", Operator::Gt, 18);
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["field"], json!("age"));
        assert_eq!(json["operator"], json!("gt"));
    }

    #[test]
    fn test_parse_str_rejects_bad_json() {
        let parser = QueryParser::new();
        assert!(matches!(parser.parse_str("{select:"), Err(Error::InvalidQuery(_))));
        assert!(parser.parse_str(r#"{"select": "*", "limit": 2}"#).is_ok());
    }

    #[test]
    fn test_index_hints() {
        let plan = QueryParser::new()
            .parse(&json!({
                "select": "label:Person",
                "traverse": {"edgeType": "KNOWS"},
                "filter": {"name": {"$contains": "A"}},
                "sort": "age"
            }))
            .unwrap();
        let types: Vec<IndexType> = plan.indexes.iter().map(|h| h.index_type).collect();
        assert!(types.contains(&IndexType::Label));
        assert!(types.contains(&IndexType::EdgeType));
        assert!(types.contains(&IndexType::FullText));
        assert!(types.contains(&IndexType::Sort));
    }

    #[test]
    fn test_validate_uses_configured_depth() {
        let parser = QueryParser::with_config(ParserConfig { max_depth: 2 });
        let plan = parser.parse(&json!({"select": "*", "filter": {"a": 1}, "limit": 1})).unwrap();
        let report = parser.validate(&plan);
        assert_eq!(report.errors, vec![Error::QueryTooDeep { depth: 3, max: 2 }]);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result = QueryParser::new().parse(&json!({"select": "*", "filter": {"age": {"$between": 1}}}));
        assert!(matches!(result, Err(Error::UnknownOperator(_))));
    }
}
