//! Plan optimizer: groups a DAG of costed steps into parallel stages.
//!
//! The optimizer is independent of the query DSL. Any list of
//! `{id, estimated_cost, depends_on}` records can be staged; query plans
//! get there through `QueryPlan::to_step_graph`.
//!
//! A stage is a scheduling hint. The caller runs every member of a stage
//! concurrently and waits for the whole stage before starting the next.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

// ============================================================================
// Input
// ============================================================================

/// One costed operation and the ids it must wait for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub estimated_cost: f64,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, estimated_cost: f64) -> Self {
        Self { id: id.into(), estimated_cost, depends_on: Vec::new() }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepGraph {
    pub steps: Vec<PlanStep>,
}

impl StepGraph {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Widest stage the optimizer emits.
    pub max_parallel_ops: usize,
    /// Greedily merge adjacent independent stages.
    pub merge_stages: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_parallel_ops: 8, merge_stages: true }
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStage {
    pub index: usize,
    pub operations: Vec<PlanStep>,
    /// Cost of the most expensive member; members run concurrently.
    pub estimated_cost: f64,
}

impl ExecutionStage {
    fn new(index: usize, operations: Vec<PlanStep>) -> Self {
        let estimated_cost = operations.iter().map(|op| op.estimated_cost).fold(0.0, f64::max);
        Self { index, operations, estimated_cost }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub total_operations: usize,
    pub stage_count: usize,
    pub sequential_cost: f64,
    pub parallel_cost: f64,
    pub critical_path_cost: f64,
    pub theoretical_speedup: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPlan {
    pub stages: Vec<ExecutionStage>,
    /// Mean operations per stage.
    pub estimated_parallelism: f64,
    pub critical_path: Vec<String>,
    pub metrics: OptimizationMetrics,
}

/// Result of `validate_optimization`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

// ============================================================================
// Optimizer
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PlanOptimizer {
    config: OptimizerConfig,
}

impl PlanOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(&self, plan: &StepGraph) -> Result<OptimizedPlan> {
        let dag = Dag::build(&plan.steps)?;
        let order = dag.topological_order()?;
        let levels = dag.levels(&order);

        let depth = levels.iter().copied().max().map_or(0, |l| l + 1);
        let mut leveled: Vec<Vec<usize>> = vec![Vec::new(); depth];
        for (idx, level) in levels.iter().enumerate() {
            leveled[*level].push(idx);
        }

        let limit = self.config.max_parallel_ops.max(1);
        let mut groups: Vec<Vec<usize>> = Vec::with_capacity(leveled.len());
        for level in leveled {
            if level.len() > limit {
                groups.extend(split_stage(&plan.steps, level, limit));
            } else {
                groups.push(level);
            }
        }
        if self.config.merge_stages {
            groups = merge_stages(&dag, groups, limit);
        }

        let stages: Vec<ExecutionStage> = groups
            .into_iter()
            .enumerate()
            .map(|(index, members)| {
                ExecutionStage::new(index, members.into_iter().map(|i| plan.steps[i].clone()).collect())
            })
            .collect();

        let (critical_path, critical_path_cost) = dag.critical_path(&order, &plan.steps);
        let sequential_cost: f64 = plan.steps.iter().map(|s| s.estimated_cost).sum();
        let parallel_cost: f64 = stages.iter().map(|s| s.estimated_cost).sum();
        let metrics = OptimizationMetrics {
            total_operations: plan.steps.len(),
            stage_count: stages.len(),
            sequential_cost,
            parallel_cost,
            critical_path_cost,
            theoretical_speedup: if parallel_cost > 0.0 { sequential_cost / parallel_cost } else { 1.0 },
        };
        let estimated_parallelism = if stages.is_empty() {
            0.0
        } else {
            plan.steps.len() as f64 / stages.len() as f64
        };

        debug!(
            steps = metrics.total_operations,
            stages = metrics.stage_count,
            speedup = metrics.theoretical_speedup,
            "optimized step graph"
        );
        Ok(OptimizedPlan { stages, estimated_parallelism, critical_path, metrics })
    }

    /// Check that `optimized` stages exactly the steps of `original` and
    /// never schedules a step before one of its dependencies.
    pub fn validate_optimization(&self, optimized: &OptimizedPlan, original: &StepGraph) -> OptimizationReport {
        let mut errors = Vec::new();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for stage in &optimized.stages {
            for id in stage.ids() {
                *seen.entry(id).or_default() += 1;
            }
        }
        let declared: HashMap<&str, &PlanStep> =
            original.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        for step in &original.steps {
            match seen.get(step.id.as_str()) {
                None => errors.push(format!("step '{}' is missing from the optimized plan", step.id)),
                Some(1) => {}
                Some(n) => errors.push(format!("step '{}' is scheduled {n} times", step.id)),
            }
        }
        for stage in &optimized.stages {
            for id in stage.ids() {
                if !declared.contains_key(id) {
                    errors.push(format!("stage {} contains unknown step '{id}'", stage.index));
                }
            }
        }

        let mut executed: HashSet<&str> = HashSet::new();
        for (position, stage) in optimized.stages.iter().enumerate() {
            for op in &stage.operations {
                let deps = declared.get(op.id.as_str()).map_or(&op.depends_on, |s| &s.depends_on);
                for dep in deps {
                    if !executed.contains(dep.as_str()) {
                        errors.push(format!(
                            "step '{}' in stage {position} depends on '{dep}', which has not executed yet",
                            op.id
                        ));
                    }
                }
            }
            executed.extend(stage.ids());
        }

        OptimizationReport { valid: errors.is_empty(), errors }
    }
}

// ============================================================================
// Graph helpers
// ============================================================================

struct Dag {
    /// Dependency indices per step, deduplicated.
    deps: Vec<Vec<usize>>,
    /// Reverse edges: steps waiting on each step.
    dependents: Vec<Vec<usize>>,
    ids: Vec<String>,
}

impl Dag {
    fn build(steps: &[PlanStep]) -> Result<Self> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.as_str(), i).is_some() {
                return Err(Error::InvalidPlan(format!("duplicate step id '{}'", step.id)));
            }
        }

        let mut deps = vec![Vec::new(); steps.len()];
        let mut dependents = vec![Vec::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let &d = index.get(dep.as_str()).ok_or_else(|| Error::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
                if !deps[i].contains(&d) {
                    deps[i].push(d);
                    dependents[d].push(i);
                }
            }
        }
        Ok(Self { deps, dependents, ids: steps.iter().map(|s| s.id.clone()).collect() })
    }

    /// Kahn's algorithm, stable in input order.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let mut pending: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = (0..pending.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &self.dependents[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() < self.ids.len() {
            let stuck: Vec<String> = (0..self.ids.len())
                .filter(|&i| pending[i] > 0)
                .map(|i| self.ids[i].clone())
                .collect();
            return Err(Error::CircularDependency(stuck));
        }
        Ok(order)
    }

    /// Level 0 for roots, else one past the deepest dependency.
    fn levels(&self, order: &[usize]) -> Vec<usize> {
        let mut level = vec![0; self.ids.len()];
        for &i in order {
            level[i] = self.deps[i].iter().map(|&d| level[d] + 1).max().unwrap_or(0);
        }
        level
    }

    /// Longest cumulative-cost chain, as ids from first to last.
    fn critical_path(&self, order: &[usize], steps: &[PlanStep]) -> (Vec<String>, f64) {
        let mut best = vec![0.0_f64; steps.len()];
        let mut via: Vec<Option<usize>> = vec![None; steps.len()];

        for &i in order {
            let parent = self.deps[i]
                .iter()
                .copied()
                .max_by(|&a, &b| best[a].total_cmp(&best[b]));
            best[i] = steps[i].estimated_cost + parent.map_or(0.0, |p| best[p]);
            via[i] = parent;
        }

        let Some(end) = order.iter().copied().max_by(|&a, &b| best[a].total_cmp(&best[b])) else {
            return (Vec::new(), 0.0);
        };
        let mut path = Vec::new();
        let mut cursor = Some(end);
        while let Some(i) = cursor {
            path.push(self.ids[i].clone());
            cursor = via[i];
        }
        path.reverse();
        (path, best[end])
    }
}

/// Chunk an oversized level, most expensive operations first.
fn split_stage(steps: &[PlanStep], mut level: Vec<usize>, limit: usize) -> Vec<Vec<usize>> {
    level.sort_by(|&a, &b| steps[b].estimated_cost.total_cmp(&steps[a].estimated_cost));
    level.chunks(limit).map(<[usize]>::to_vec).collect()
}

fn merge_stages(dag: &Dag, groups: Vec<Vec<usize>>, limit: usize) -> Vec<Vec<usize>> {
    let mut merged: Vec<Vec<usize>> = Vec::with_capacity(groups.len());
    for group in groups {
        match merged.last_mut() {
            Some(prev) if can_merge(dag, prev, &group, limit) => prev.extend(group),
            _ => merged.push(group),
        }
    }
    merged
}

fn can_merge(dag: &Dag, earlier: &[usize], later: &[usize], limit: usize) -> bool {
    earlier.len() + later.len() <= limit
        && later.iter().all(|&i| dag.deps[i].iter().all(|d| !earlier.contains(d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diamond() -> StepGraph {
        StepGraph::new(vec![
            PlanStep::new("load", 10.0),
            PlanStep::new("left", 5.0).after("load"),
            PlanStep::new("right", 20.0).after("load"),
            PlanStep::new("join", 1.0).after("left").after("right"),
        ])
    }

    fn stage_ids(plan: &OptimizedPlan) -> Vec<Vec<&str>> {
        plan.stages.iter().map(|s| s.ids().collect()).collect()
    }

    #[test]
    fn test_diamond_levels() {
        let optimizer = PlanOptimizer::new();
        let plan = optimizer.optimize(&diamond()).unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["load"], vec!["left", "right"], vec!["join"]]);
        assert_eq!(plan.critical_path, vec!["load", "right", "join"]);
        assert_eq!(plan.metrics.critical_path_cost, 31.0);
        assert_eq!(plan.metrics.sequential_cost, 36.0);
        assert_eq!(plan.metrics.parallel_cost, 31.0);
        assert!(optimizer.validate_optimization(&plan, &diamond()).valid);
    }

    #[test]
    fn test_wide_level_split_by_cost() {
        let steps = (0..5).map(|i| PlanStep::new(format!("s{i}"), i as f64)).collect();
        let optimizer = PlanOptimizer::with_config(OptimizerConfig { max_parallel_ops: 2, merge_stages: true });
        let plan = optimizer.optimize(&StepGraph::new(steps)).unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["s4", "s3"], vec!["s2", "s1"], vec!["s0"]]);
        assert_eq!(plan.estimated_parallelism, 5.0 / 3.0);
    }

    #[test]
    fn test_independent_levels_merge() {
        let steps = vec![
            PlanStep::new("a", 1.0),
            PlanStep::new("b", 1.0),
            PlanStep::new("c", 1.0),
        ];
        let optimizer = PlanOptimizer::with_config(OptimizerConfig { max_parallel_ops: 2, merge_stages: true });
        let plan = optimizer.optimize(&StepGraph::new(steps.clone())).unwrap();
        // split into [a,b] + [c]; a full chunk never absorbs another
        assert_eq!(plan.stages.len(), 2);

        let wide = PlanOptimizer::with_config(OptimizerConfig { max_parallel_ops: 3, merge_stages: false });
        assert_eq!(wide.optimize(&StepGraph::new(steps)).unwrap().stages.len(), 1);
    }

    #[test]
    fn test_cycle_detected() {
        let graph = StepGraph::new(vec![
            PlanStep::new("a", 1.0).after("c"),
            PlanStep::new("b", 1.0).after("a"),
            PlanStep::new("c", 1.0).after("b"),
            PlanStep::new("free", 1.0),
        ]);
        assert_eq!(
            PlanOptimizer::new().optimize(&graph),
            Err(Error::CircularDependency(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let graph = StepGraph::new(vec![PlanStep::new("a", 1.0).after("ghost")]);
        assert_eq!(
            PlanOptimizer::new().optimize(&graph),
            Err(Error::UnknownDependency { step: "a".into(), dependency: "ghost".into() })
        );
    }

    #[test]
    fn test_validation_catches_drop_duplicate_and_order() {
        let optimizer = PlanOptimizer::new();
        let original = diamond();
        let plan = optimizer.optimize(&original).unwrap();

        let mut dropped = plan.clone();
        dropped.stages[1].operations.pop();
        let report = optimizer.validate_optimization(&dropped, &original);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("'right' is missing")));

        let mut duplicated = plan.clone();
        let extra = duplicated.stages[0].operations[0].clone();
        duplicated.stages[2].operations.push(extra);
        let report = optimizer.validate_optimization(&duplicated, &original);
        assert!(report.errors.iter().any(|e| e.contains("'load' is scheduled 2 times")));

        let mut reordered = plan;
        reordered.stages.swap(0, 2);
        let report = optimizer.validate_optimization(&reordered, &original);
        assert!(report.errors.iter().any(|e| e.contains("'join' in stage 0 depends on")));
    }

    #[test]
    fn test_empty_graph() {
        let plan = PlanOptimizer::new().optimize(&StepGraph::default()).unwrap();
        assert!(plan.stages.is_empty());
        assert!(plan.critical_path.is_empty());
        assert_eq!(plan.metrics.theoretical_speedup, 1.0);
    }
}
