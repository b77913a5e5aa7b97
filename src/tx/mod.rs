//! Transaction management.
//!
//! A [`GraphTransaction`] queues mutations and applies them atomically on
//! `commit`. Lifecycle:
//!
//! ```text
//! new ──begin──▶ pending ──commit──▶ committed
//!                   │  ╰──commit fails──▶ rolled_back (auto_rollback) | failed
//!                   ├──rollback──▶ rolled_back
//!                   ╰──timeout───▶ rolled_back (auto_rollback) | failed
//! ```
//!
//! Atomicity is logical only. Prior state is read from storage when a
//! mutation is queued, without isolation from concurrent writers.

pub mod mutation;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Edge, EdgeKey, Node, NodeId, PropertyMap};
use crate::storage::StorageBackend;
use crate::{Error, Result};

pub use mutation::{Mutation, MutationOp, RollbackData};

// ============================================================================
// Ids, state, config
// ============================================================================

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    /// Created, `begin` not yet called.
    New,
    Pending,
    Committed,
    RolledBack,
    /// Commit or rollback failed without recovery, or timed out with
    /// `auto_rollback` disabled.
    Failed,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::New => "new",
            TxState::Pending => "pending",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled_back",
            TxState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack | TxState::Failed)
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Deadline from `begin`; 0 disables the timer.
    pub timeout_ms: u64,
    /// Undo applied mutations on commit failure or timeout.
    pub auto_rollback: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000, auto_rollback: true }
    }
}

/// Outcome of `commit` or `rollback`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    /// True only when the mutations took effect.
    pub success: bool,
    pub transaction_id: TxId,
    pub mutation_count: usize,
    pub duration_ms: u64,
    pub error: Option<Error>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxEventKind {
    Begin,
    Commit,
    Rollback,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    Explicit,
    CommitFailed,
    Timeout,
}

/// Lifecycle event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TxEvent {
    Begin { tx: TxId, started_at: DateTime<Utc> },
    Commit { tx: TxId, mutation_count: usize, duration_ms: u64 },
    Rollback { tx: TxId, undone: usize, reason: RollbackReason },
    Error { tx: TxId, error: Error },
    Timeout { tx: TxId, timeout_ms: u64 },
}

impl TxEvent {
    pub fn kind(&self) -> TxEventKind {
        match self {
            TxEvent::Begin { .. } => TxEventKind::Begin,
            TxEvent::Commit { .. } => TxEventKind::Commit,
            TxEvent::Rollback { .. } => TxEventKind::Rollback,
            TxEvent::Error { .. } => TxEventKind::Error,
            TxEvent::Timeout { .. } => TxEventKind::Timeout,
        }
    }
}

type Listener = Arc<dyn Fn(&TxEvent) -> Result<()> + Send + Sync>;

// ============================================================================
// Shared state
// ============================================================================

struct Status {
    state: TxState,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    /// Leading log entries applied to storage and not yet undone.
    applied: usize,
    timed_out: bool,
    error: Option<Error>,
    mutation_count: usize,
}

/// State reachable from both the handle and the timeout task.
struct TxShared {
    id: TxId,
    config: TransactionConfig,
    status: Mutex<Status>,
    /// Mutation log. Holding this lock serialises commit, rollback,
    /// timeout and mutation queuing.
    log: tokio::sync::Mutex<Vec<MutationOp>>,
    listeners: RwLock<Vec<(TxEventKind, Listener)>>,
}

impl TxShared {
    fn state(&self) -> TxState {
        self.status.lock().state
    }

    fn elapsed_ms(&self) -> u64 {
        self.status.lock().started.map_or(0, |s| s.elapsed().as_millis() as u64)
    }

    fn set_state(&self, state: TxState) {
        let mut status = self.status.lock();
        debug!(tx_id = %self.id, from = %status.state, to = %state, "transaction state");
        status.state = state;
    }

    fn record_error(&self, error: &Error) {
        self.status.lock().error = Some(error.clone());
        self.emit(&TxEvent::Error { tx: self.id, error: error.clone() });
    }

    /// Fail unless the transaction accepts work.
    fn ensure_pending(&self) -> Result<()> {
        let status = self.status.lock();
        if status.timed_out {
            return Err(Error::Timeout { tx: self.id, timeout_ms: self.config.timeout_ms });
        }
        match status.state {
            TxState::Pending => Ok(()),
            TxState::Committed => Err(Error::AlreadyCommitted(self.id)),
            TxState::RolledBack => Err(Error::AlreadyRolledBack(self.id)),
            state => Err(Error::NotPending { tx: self.id, state }),
        }
    }

    /// Deliver an event. Listener errors and panics are logged and dropped.
    fn emit(&self, event: &TxEvent) {
        let kind = event.kind();
        // called without the lock held, so listeners may register listeners
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(tx_id = %self.id, event = ?kind, error = %e, "transaction listener failed"),
                Err(_) => warn!(tx_id = %self.id, event = ?kind, "transaction listener panicked"),
            }
        }
    }

    /// Undo `log[..applied]` in reverse. On failure the entries not yet
    /// undone stay counted as applied.
    async fn undo_applied<B: StorageBackend + ?Sized>(&self, backend: &B, log: &[MutationOp]) -> Result<usize> {
        let applied = self.status.lock().applied;
        for index in (0..applied).rev() {
            let op = &log[index];
            if let Err(e) = op.undo(backend).await {
                self.status.lock().applied = index + 1;
                return Err(Error::MutationFailed {
                    index,
                    operation: format!("undo {}", op.name()),
                    source: Box::new(e),
                });
            }
        }
        self.status.lock().applied = 0;
        Ok(applied)
    }

    /// Roll back with the log lock held; marks `failed` if undo fails.
    async fn rollback_locked<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        log: &[MutationOp],
        reason: RollbackReason,
    ) -> Result<usize> {
        match self.undo_applied(backend, log).await {
            Ok(undone) => {
                self.set_state(TxState::RolledBack);
                warn!(tx_id = %self.id, undone, ?reason, "transaction rolled back");
                self.emit(&TxEvent::Rollback { tx: self.id, undone, reason });
                Ok(undone)
            }
            Err(e) => {
                self.set_state(TxState::Failed);
                self.record_error(&e);
                Err(e)
            }
        }
    }

    async fn on_timeout<B: StorageBackend + ?Sized>(&self, backend: &B) {
        let log = self.log.lock().await;
        if self.state() != TxState::Pending {
            return;
        }
        self.status.lock().timed_out = true;
        let timeout_ms = self.config.timeout_ms;
        warn!(tx_id = %self.id, timeout_ms, "transaction timed out");
        self.emit(&TxEvent::Timeout { tx: self.id, timeout_ms });

        let error = Error::Timeout { tx: self.id, timeout_ms };
        self.status.lock().error = Some(error);
        if self.config.auto_rollback {
            // Pending means nothing was applied; this only discards the queue.
            let _ = self.rollback_locked(backend, &log, RollbackReason::Timeout).await;
        } else {
            self.set_state(TxState::Failed);
        }
    }
}

// ============================================================================
// GraphTransaction
// ============================================================================

/// Batches mutations and commits or rolls them back atomically.
pub struct GraphTransaction<B: StorageBackend> {
    backend: Arc<B>,
    shared: Arc<TxShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<B: StorageBackend> GraphTransaction<B> {
    pub fn new(backend: Arc<B>, config: TransactionConfig) -> Self {
        let shared = TxShared {
            id: TxId::new(),
            config,
            status: Mutex::new(Status {
                state: TxState::New,
                started_at: None,
                started: None,
                applied: 0,
                timed_out: false,
                error: None,
                mutation_count: 0,
            }),
            log: tokio::sync::Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        };
        Self { backend, shared: Arc::new(shared), timer: Mutex::new(None) }
    }

    pub fn id(&self) -> TxId {
        self.shared.id
    }

    pub fn state(&self) -> TxState {
        self.shared.state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TxState::Pending
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.shared.config
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.status.lock().started_at
    }

    /// Last recorded failure.
    pub fn error(&self) -> Option<Error> {
        self.shared.status.lock().error.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.shared.status.lock().mutation_count
    }

    /// Snapshot of the queued log.
    pub async fn mutations(&self) -> Vec<MutationOp> {
        self.shared.log.lock().await.clone()
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: TxEventKind, listener: F)
    where
        F: Fn(&TxEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.listeners.write().push((kind, Arc::new(listener)));
    }

    /// Start the transaction and its timeout timer.
    ///
    /// Must run inside a tokio runtime when a timeout is configured.
    pub async fn begin(&self) -> Result<()> {
        let _log = self.shared.log.lock().await;
        let started_at = {
            let mut status = self.shared.status.lock();
            if status.state != TxState::New {
                return Err(Error::AlreadyStarted(self.shared.id));
            }
            let now = Utc::now();
            status.state = TxState::Pending;
            status.started_at = Some(now);
            status.started = Some(Instant::now());
            now
        };
        debug!(tx_id = %self.shared.id, timeout_ms = self.shared.config.timeout_ms, "transaction begin");
        self.shared.emit(&TxEvent::Begin { tx: self.shared.id, started_at });

        if self.shared.config.timeout_ms > 0 {
            let shared = Arc::clone(&self.shared);
            let backend = Arc::clone(&self.backend);
            let timeout = Duration::from_millis(self.shared.config.timeout_ms);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.on_timeout(backend.as_ref()).await;
            });
            *self.timer.lock() = Some(handle);
        }
        Ok(())
    }

    // ========================================================================
    // Mutation builders
    // ========================================================================

    pub async fn add_node(&self, node: Node) -> Result<()> {
        self.push(Mutation::AddNode { node }, RollbackData::Nothing).await
    }

    pub async fn add_edge(&self, edge: Edge) -> Result<()> {
        self.push(Mutation::AddEdge { edge }, RollbackData::Nothing).await
    }

    pub async fn remove_node(&self, id: impl Into<NodeId>) -> Result<()> {
        let id = id.into();
        let mut log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        let rollback = match self.backend.get_node(&id).await? {
            Some(node) => {
                let edges = self.backend.edges_for_node(&id).await?;
                RollbackData::RemovedNode { node, edges }
            }
            None if log.iter().any(|op| op.mutation.created_node() == Some(&id)) => {
                RollbackData::CreatedInTransaction
            }
            None => return Err(Error::NotFound(format!("node {id}"))),
        };
        self.enqueue(&mut log, Mutation::RemoveNode { id }, rollback);
        Ok(())
    }

    pub async fn update_node(&self, id: impl Into<NodeId>, updates: PropertyMap) -> Result<()> {
        let id = id.into();
        let mut log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        let rollback = match self.backend.get_node(&id).await? {
            Some(node) => RollbackData::PreviousProperties {
                previous: mutation::previous_values(&node.properties, &updates),
            },
            None if log.iter().any(|op| op.mutation.created_node() == Some(&id)) => {
                RollbackData::CreatedInTransaction
            }
            None => return Err(Error::NotFound(format!("node {id}"))),
        };
        self.enqueue(&mut log, Mutation::UpdateNode { id, updates }, rollback);
        Ok(())
    }

    pub async fn remove_edge(&self, key: EdgeKey) -> Result<()> {
        let mut log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        let rollback = match self.backend.get_edge(&key).await? {
            Some(edge) => RollbackData::RemovedEdge { edge },
            None if created_edge_in(&log, &key) => RollbackData::CreatedInTransaction,
            None => return Err(Error::NotFound(format!("edge {key}"))),
        };
        self.enqueue(&mut log, Mutation::RemoveEdge { key }, rollback);
        Ok(())
    }

    pub async fn update_edge(&self, key: EdgeKey, updates: PropertyMap) -> Result<()> {
        let mut log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        let rollback = match self.backend.get_edge(&key).await? {
            Some(edge) => RollbackData::PreviousProperties {
                previous: mutation::previous_values(&edge.properties, &updates),
            },
            None if created_edge_in(&log, &key) => RollbackData::CreatedInTransaction,
            None => return Err(Error::NotFound(format!("edge {key}"))),
        };
        self.enqueue(&mut log, Mutation::UpdateEdge { key, updates }, rollback);
        Ok(())
    }

    async fn push(&self, mutation: Mutation, rollback: RollbackData) -> Result<()> {
        let mut log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        self.enqueue(&mut log, mutation, rollback);
        Ok(())
    }

    fn enqueue(&self, log: &mut Vec<MutationOp>, mutation: Mutation, rollback: RollbackData) {
        debug!(tx_id = %self.shared.id, op = mutation.name(), index = log.len(), "queued mutation");
        log.push(MutationOp { mutation, rollback });
        self.shared.status.lock().mutation_count = log.len();
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Apply every queued mutation in order.
    ///
    /// On the first failure, applied mutations are undone (with
    /// `auto_rollback`) or the transaction is marked failed; the
    /// triggering error is returned either way.
    pub async fn commit(&self) -> Result<TransactionResult> {
        let log = self.shared.log.lock().await;
        self.shared.ensure_pending()?;
        self.cancel_timer();

        let mut failure = None;
        for (index, op) in log.iter().enumerate() {
            if let Err(e) = op.mutation.apply(self.backend.as_ref()).await {
                failure = Some(Error::MutationFailed {
                    index,
                    operation: op.name().to_string(),
                    source: Box::new(e),
                });
                break;
            }
            self.shared.status.lock().applied = index + 1;
        }

        let duration_ms = self.shared.elapsed_ms();
        let Some(error) = failure else {
            self.shared.status.lock().applied = 0;
            self.shared.set_state(TxState::Committed);
            info!(tx_id = %self.shared.id, mutations = log.len(), duration_ms, "transaction committed");
            self.shared.emit(&TxEvent::Commit { tx: self.shared.id, mutation_count: log.len(), duration_ms });
            return Ok(TransactionResult {
                success: true,
                transaction_id: self.shared.id,
                mutation_count: log.len(),
                duration_ms,
                error: None,
            });
        };

        warn!(tx_id = %self.shared.id, error = %error, "transaction commit failed");
        self.shared.record_error(&error);
        if self.shared.config.auto_rollback {
            // An undo failure is recorded on the transaction; the commit
            // error is still the one reported.
            let _ = self.shared.rollback_locked(self.backend.as_ref(), &log, RollbackReason::CommitFailed).await;
        } else {
            self.shared.set_state(TxState::Failed);
        }
        Err(error)
    }

    /// Undo applied mutations in reverse order and end the transaction.
    ///
    /// A pending transaction has applied nothing, so its queue is simply
    /// discarded. A failed transaction may be rolled back to undo
    /// whatever its failed commit left applied.
    pub async fn rollback(&self) -> Result<TransactionResult> {
        let log = self.shared.log.lock().await;
        {
            let status = self.shared.status.lock();
            if status.timed_out {
                return Err(Error::Timeout { tx: self.shared.id, timeout_ms: self.shared.config.timeout_ms });
            }
            match status.state {
                TxState::Pending | TxState::Failed => {}
                TxState::Committed => return Err(Error::AlreadyCommitted(self.shared.id)),
                TxState::RolledBack => return Err(Error::AlreadyRolledBack(self.shared.id)),
                state => return Err(Error::NotPending { tx: self.shared.id, state }),
            }
        }
        self.cancel_timer();

        let undone = self
            .shared
            .rollback_locked(self.backend.as_ref(), &log, RollbackReason::Explicit)
            .await?;
        debug!(tx_id = %self.shared.id, undone, "explicit rollback");
        Ok(TransactionResult {
            success: false,
            transaction_id: self.shared.id,
            mutation_count: log.len(),
            duration_ms: self.shared.elapsed_ms(),
            error: None,
        })
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

impl<B: StorageBackend> Drop for GraphTransaction<B> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

fn created_edge_in(log: &[MutationOp], key: &EdgeKey) -> bool {
    log.iter().any(|op| op.mutation.created_edge().as_ref() == Some(key))
}
