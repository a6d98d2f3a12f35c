// ============================================================================
// Transaction State Management
// ============================================================================
//
// State Pattern for the transaction lifecycle of the reference store:
// Active -> Committed | Aborted.
//
// Nesting follows the "commit only if every level was marked successful"
// contract: each begin pushes a level, each end pops one, and a level that
// ends without being marked poisons the whole transaction.
//
// ============================================================================

use super::Change;
use crate::core::{DaoError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// What closing one nesting level means for the transaction as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOutcome {
    /// An outer level is still open
    Nested,
    /// The outermost level closed and every level was marked successful
    Commit,
    /// The outermost level closed and at least one level was not marked
    Rollback,
}

/// A transaction of the reference store
///
/// Owned by the store under its state lock; never shared across threads.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    /// One flag per open nesting level: was it marked successful?
    levels: Vec<bool>,
    /// A closed inner level was not marked successful
    poisoned: bool,
    /// Undo log, oldest first
    changes: Vec<Change>,
    start_time: Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            levels: vec![false],
            poisoned: false,
            changes: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Whether the innermost open level has been marked successful
    pub fn innermost_marked(&self) -> bool {
        self.levels.last().copied().unwrap_or(false)
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Open a nested level
    pub fn push_level(&mut self) -> Result<()> {
        self.ensure_active("begin nested level")?;
        self.levels.push(false);
        Ok(())
    }

    /// Mark the innermost open level as successful
    pub fn mark_successful(&mut self) -> Result<()> {
        self.ensure_active("mark successful")?;
        match self.levels.last_mut() {
            Some(level) if !*level => {
                *level = true;
                Ok(())
            }
            Some(_) => Err(DaoError::TransactionError(format!(
                "transaction {} level {} already marked successful",
                self.id,
                self.levels.len()
            ))),
            None => Err(DaoError::TransactionError(format!(
                "transaction {} has no open level",
                self.id
            ))),
        }
    }

    /// Close the innermost level
    pub fn pop_level(&mut self) -> Result<LevelOutcome> {
        self.ensure_active("end level")?;
        let marked = self.levels.pop().ok_or_else(|| {
            DaoError::TransactionError(format!("transaction {} has no open level", self.id))
        })?;
        if !marked {
            self.poisoned = true;
        }

        if !self.levels.is_empty() {
            return Ok(LevelOutcome::Nested);
        }
        if self.poisoned {
            Ok(LevelOutcome::Rollback)
        } else {
            Ok(LevelOutcome::Commit)
        }
    }

    /// Record a reversible write
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active("record change")?;
        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed and drop the undo log
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and hand back the undo log, newest first
    pub fn rollback(&mut self) -> Result<Vec<Change>> {
        self.ensure_active("rollback")?;
        self.state = TransactionState::Aborted;
        let mut undo = std::mem::take(&mut self.changes);
        undo.reverse();
        Ok(undo)
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(DaoError::TransactionError(format!(
                "Cannot {}: transaction {} is {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }
}
