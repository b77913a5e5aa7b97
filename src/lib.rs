//! # graph-engine: query, transaction and projection engine
//!
//! Declarative querying, pattern matching, atomic mutation and
//! point-in-time diffing over a property graph held by a pluggable
//! storage backend.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the engine and storage
//! 2. **Plain DTOs**: `Node`, `Edge`, `Value` cross all boundaries
//! 3. **Parsing is pure**: DSL → plan and text → pattern own no state
//! 4. **No ambient state**: everything hangs off an explicitly built [`Engine`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graph_engine::{Engine, Node, Edge};
//! use serde_json::json;
//!
//! # async fn example() -> graph_engine::Result<()> {
//! let engine = Engine::open_memory().await?;
//!
//! let tx = engine.begin().await?;
//! tx.add_node(Node::new("a").with_labels(["Person"]).with_property("name", "Alice")).await?;
//! tx.add_node(Node::new("b").with_labels(["Person"]).with_property("name", "Bob")).await?;
//! tx.add_edge(Edge::new("a", "b", "KNOWS")).await?;
//! tx.commit().await?;
//!
//! let result = engine
//!     .query(&json!({"select": "a", "traverse": {"direction": "out", "edgeType": "KNOWS"}}))
//!     .await?;
//! assert_eq!(result.ids(), vec!["b"]);
//!
//! let matches = engine.match_text("(p:Person)-[:KNOWS]->(q:Person)", &Default::default()).await?;
//! assert_eq!(matches.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | `QueryParser` | `query` | DSL → plan tree, rewrite, validation |
//! | `PlanOptimizer` | `planner` | Step DAG → parallel execution stages |
//! | `PatternMatcher` | `pattern` | `(a)-[:T*1..3]->(b)` subgraph matching |
//! | `GraphTransaction` | `tx` | Atomic mutation batches with rollback |
//! | `SnapshotDiff` | `diff` | Structural diff of graph snapshots |
//! | `Projector` | `projection` | Result reshaping |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod index;
pub mod query;
pub mod planner;
pub mod execution;
pub mod pattern;
pub mod tx;
pub mod diff;
pub mod projection;
pub mod config;

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::debug;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{props, Direction, Edge, EdgeKey, Node, NodeId, Path, PropertyMap, Value};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{BackendCapabilities, MemoryBackend, StorageBackend};

// ============================================================================
// Re-exports: Components
// ============================================================================

pub use config::EngineConfig;
pub use diff::{DiffConfig, GraphSnapshot, SnapshotDiff, SnapshotDiffResult};
pub use execution::{ExecutionStats, QueryResult};
pub use pattern::{
    Binding, Bindings, MatchOptions, MatchResult, MatcherConfig, NodePattern, PathPattern,
    PatternMatcher, PropertyConstraint, RelationshipPattern,
};
pub use planner::{OptimizedPlan, OptimizerConfig, PlanOptimizer, PlanStep, StepGraph};
pub use projection::{FieldType, Projection, ProjectionSpec, Projector, ProjectorConfig};
pub use query::{ParserConfig, PlanValidation, QueryParser, QueryPlan};
pub use tx::{GraphTransaction, TransactionConfig, TransactionResult, TxEvent, TxEventKind, TxId, TxState};

// ============================================================================
// Top-level Engine handle
// ============================================================================

/// The primary entry point. An `Engine` wraps a storage backend and
/// owns one instance of each component, configured from [`EngineConfig`].
pub struct Engine<B: StorageBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    parser: QueryParser,
    optimizer: PlanOptimizer,
    differ: SnapshotDiff,
    projector: Projector,
}

impl<B: StorageBackend> Engine<B> {
    /// Create an engine with default configuration.
    pub fn with_backend(backend: B) -> Self {
        Self::with_config(Arc::new(backend), EngineConfig::default())
    }

    /// Create an engine over a shared backend.
    pub fn with_config(backend: Arc<B>, config: EngineConfig) -> Self {
        Self {
            parser: QueryParser::with_config(config.parser.clone()),
            optimizer: PlanOptimizer::with_config(config.optimizer.clone()),
            differ: SnapshotDiff::with_config(config.diff.clone()),
            projector: Projector::with_config(config.projector.clone()),
            backend,
            config,
        }
    }

    /// Use `comparator` when diffing nodes labelled `label`.
    pub fn with_comparator(mut self, label: impl Into<String>, comparator: impl diff::NodeComparator + 'static) -> Self {
        self.differ = self.differ.with_comparator(label, comparator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Parse, validate and optimize a DSL query without running it.
    pub fn parse(&self, dsl: &Json) -> Result<QueryPlan> {
        let plan = self.parser.parse(dsl)?;
        let validation = self.parser.validate(&plan);
        for warning in &validation.warnings {
            debug!(warning = %warning, "query plan warning");
        }
        if let Some(error) = validation.errors.into_iter().next() {
            return Err(error);
        }
        Ok(self.parser.optimize(&plan))
    }

    /// Run a DSL query.
    pub async fn query(&self, dsl: &Json) -> Result<QueryResult> {
        let plan = self.parse(dsl)?;
        execution::execute(self.backend.as_ref(), &plan, &self.config.matcher).await
    }

    /// Run a DSL query and reshape its rows.
    pub async fn query_projected(&self, dsl: &Json, spec: &ProjectionSpec) -> Result<Projection> {
        let result = self.query(dsl).await?;
        self.projector.project(&result.items, spec)
    }

    // ========================================================================
    // Pattern matching
    // ========================================================================

    fn matcher(&self) -> PatternMatcher<B> {
        PatternMatcher::with_config(Arc::clone(&self.backend), self.config.matcher.clone())
    }

    pub async fn match_pattern(&self, pattern: &PathPattern, options: &MatchOptions) -> Result<Vec<MatchResult>> {
        self.matcher().match_pattern(pattern, options).await
    }

    /// Parse `(a:Label)-[:TYPE]->(b)` text and match it.
    pub async fn match_text(&self, pattern: &str, options: &MatchOptions) -> Result<Vec<MatchResult>> {
        let pattern = PathPattern::parse(pattern)?;
        self.match_pattern(&pattern, options).await
    }

    pub async fn match_multiple(&self, patterns: &[PathPattern], options: &MatchOptions) -> Result<Vec<MatchResult>> {
        self.matcher().match_multiple(patterns, options).await
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction with the configured timeout.
    pub async fn begin(&self) -> Result<GraphTransaction<B>> {
        self.begin_with(self.config.transaction.clone()).await
    }

    pub async fn begin_with(&self, config: TransactionConfig) -> Result<GraphTransaction<B>> {
        let tx = GraphTransaction::new(Arc::clone(&self.backend), config);
        tx.begin().await?;
        Ok(tx)
    }

    // ========================================================================
    // Snapshots, diffs and stage planning
    // ========================================================================

    pub async fn snapshot(&self, version: impl Into<String>) -> Result<GraphSnapshot> {
        GraphSnapshot::capture(self.backend.as_ref(), version).await
    }

    pub fn diff(&self, from: &GraphSnapshot, to: &GraphSnapshot) -> Result<SnapshotDiffResult> {
        self.differ.compute(from, to)
    }

    /// Group a dependency graph of costed steps into parallel stages.
    pub fn optimize_steps(&self, steps: &StepGraph) -> Result<OptimizedPlan> {
        self.optimizer.optimize(steps)
    }
}

/// In-memory engine for testing and embedding.
impl Engine<MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        Ok(Self::with_backend(MemoryBackend::new()))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Coarse error class, for callers deciding whether to retry or fix input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: DSL, pattern text, projection spec, config.
    Validation,
    /// Operation attempted in the wrong transaction state.
    State,
    /// Cyclic plans, dangling dependencies, incomplete snapshots.
    Structural,
    Timeout,
    /// Raised by the storage backend.
    Storage,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown aggregation '{op}' for field '{field}'")]
    UnknownAggregation { field: String, op: String },

    #[error("Query plan too deep: depth {depth} exceeds {max}")]
    QueryTooDeep { depth: usize, max: usize },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Pattern syntax error at position {position}: {message}")]
    PatternSyntax { position: usize, message: String },

    #[error("Invalid projection spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Circular dependency between steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Transaction {0} already started")]
    AlreadyStarted(TxId),

    #[error("Transaction {tx} is {state}, not pending")]
    NotPending { tx: TxId, state: TxState },

    #[error("Transaction {0} already committed")]
    AlreadyCommitted(TxId),

    #[error("Transaction {0} already rolled back")]
    AlreadyRolledBack(TxId),

    #[error("Transaction {tx} timed out after {timeout_ms}ms")]
    Timeout { tx: TxId, timeout_ms: u64 },

    #[error("Mutation {index} ({operation}) failed: {source}")]
    MutationFailed {
        index: usize,
        operation: String,
        source: Box<Error>,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidQuery(_)
            | Error::UnknownOperator(_)
            | Error::UnknownAggregation { .. }
            | Error::QueryTooDeep { .. }
            | Error::PatternSyntax { .. }
            | Error::InvalidSpec(_)
            | Error::InvalidConfig(_) => ErrorKind::Validation,
            Error::InvalidPlan(_)
            | Error::CircularDependency(_)
            | Error::UnknownDependency { .. }
            | Error::InvalidSnapshot(_) => ErrorKind::Structural,
            Error::AlreadyStarted(_)
            | Error::NotPending { .. }
            | Error::AlreadyCommitted(_)
            | Error::AlreadyRolledBack(_) => ErrorKind::State,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::MutationFailed { source, .. } => source.kind(),
            Error::StorageError(_) | Error::NotFound(_) | Error::ConstraintViolation(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
