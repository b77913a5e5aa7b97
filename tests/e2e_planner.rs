//! End-to-end tests for stage planning.

use std::collections::HashMap;

use graph_engine::{Engine, Error, OptimizedPlan, OptimizerConfig, PlanOptimizer, PlanStep, StepGraph};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Generators
// ============================================================================

/// A DAG where step `i` may only depend on steps `0..i`.
fn arb_dag() -> impl Strategy<Value = StepGraph> {
    (1usize..16).prop_flat_map(|n| {
        let costs = prop::collection::vec(0.5f64..50.0, n);
        let deps = prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n);
        (costs, deps).prop_map(move |(costs, deps): (Vec<f64>, Vec<Vec<prop::sample::Index>>)| {
            let steps = (0..n)
                .map(|i| {
                    let mut step = PlanStep::new(format!("s{i}"), costs[i]);
                    if i > 0 {
                        for pick in &deps[i] {
                            let dep = format!("s{}", pick.index(i));
                            if !step.depends_on.contains(&dep) {
                                step = step.after(dep);
                            }
                        }
                    }
                    step
                })
                .collect();
            StepGraph::new(steps)
        })
    })
}

fn stage_of(plan: &OptimizedPlan) -> HashMap<String, usize> {
    plan.stages
        .iter()
        .enumerate()
        .flat_map(|(position, stage)| stage.ids().map(move |id| (id.to_string(), position)))
        .collect()
}

// ============================================================================
// 1. Staging properties
// ============================================================================

proptest! {
    #[test]
    fn prop_stages_respect_dependencies(
        graph in arb_dag(),
        max_parallel_ops in 1usize..5,
        merge_stages in any::<bool>(),
    ) {
        let optimizer = PlanOptimizer::with_config(OptimizerConfig { max_parallel_ops, merge_stages });
        let plan = optimizer.optimize(&graph).unwrap();

        let report = optimizer.validate_optimization(&plan, &graph);
        prop_assert!(report.valid, "{:?}", report.errors);

        let stages = stage_of(&plan);
        prop_assert_eq!(stages.len(), graph.steps.len());
        for stage in &plan.stages {
            prop_assert!(stage.operations.len() <= max_parallel_ops);
            for op in &stage.operations {
                for dep in &op.depends_on {
                    prop_assert!(stages[dep] < stages[&op.id], "{} scheduled with or before {}", op.id, dep);
                }
            }
        }

        let m = &plan.metrics;
        prop_assert!(m.parallel_cost <= m.sequential_cost + 1e-9);
        prop_assert!(m.critical_path_cost <= m.parallel_cost + 1e-9);
        prop_assert!(m.theoretical_speedup >= 1.0 - 1e-9);
    }
}

// ============================================================================
// 2. Validation and errors
// ============================================================================

#[test]
fn test_tampered_plans_fail_validation() {
    let graph = StepGraph::new(vec![
        PlanStep::new("fetch", 4.0),
        PlanStep::new("parse", 2.0).after("fetch"),
        PlanStep::new("index", 3.0).after("fetch"),
        PlanStep::new("report", 1.0).after("parse").after("index"),
    ]);
    let optimizer = PlanOptimizer::new();
    let plan = optimizer.optimize(&graph).unwrap();
    assert!(optimizer.validate_optimization(&plan, &graph).valid);

    let mut dropped = plan.clone();
    dropped.stages.pop();
    let report = optimizer.validate_optimization(&dropped, &graph);
    assert_eq!(report.errors, vec!["step 'report' is missing from the optimized plan"]);

    let mut duplicated = plan;
    let again = duplicated.stages[0].operations[0].clone();
    duplicated.stages[1].operations.push(again);
    assert!(!optimizer.validate_optimization(&duplicated, &graph).valid);
}

#[test]
fn test_cycle_through_engine() {
    let graph = StepGraph::new(vec![
        PlanStep::new("a", 1.0).after("b"),
        PlanStep::new("b", 1.0).after("a"),
    ]);
    let engine = graph_engine::Engine::with_backend(graph_engine::MemoryBackend::new());
    assert_eq!(
        engine.optimize_steps(&graph),
        Err(Error::CircularDependency(vec!["a".into(), "b".into()]))
    );
}

// ============================================================================
// 3. Query plans as step graphs
// ============================================================================

#[tokio::test]
async fn test_query_plan_lowers_to_chain() {
    let engine = Engine::open_memory().await.unwrap();
    let plan = engine
        .parse(&json!({"select": "*", "filter": {"age": {"$gt": 1}}, "sort": "age", "limit": 3}))
        .unwrap();

    let graph = plan.to_step_graph();
    assert_eq!(graph.steps.len(), 4);
    // the root comes first and depends on its child
    for pair in graph.steps.windows(2) {
        assert_eq!(pair[0].depends_on, vec![pair[1].id.clone()]);
    }
    assert!(graph.steps.iter().all(|s| s.estimated_cost > 0.0));

    let staged = engine.optimize_steps(&graph).unwrap();
    assert_eq!(staged.stages.len(), 4);
    assert_eq!(staged.stages[0].ids().collect::<Vec<_>>(), vec![graph.steps[3].id.as_str()]);
    assert_eq!(staged.critical_path.len(), 4);
}
