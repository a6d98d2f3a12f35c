//! Transactional store contract used by the asynchronous executor.
//!
//! The executor never talks SQL; it only needs to open a transaction, mark
//! it successful and end it. Ending commits only if every nesting level was
//! marked successful, otherwise the transaction rolls back.

use crate::core::Result;
use std::sync::Arc;
use tracing::warn;

/// A store that supports (possibly nested) transactions
///
/// Implementations must be shareable between the worker thread and callers.
/// Only the thread that began a transaction may mark or end it.
pub trait TransactionalStore: Send + Sync {
    /// Open a transaction, or a nested level if one is already open on this thread
    fn begin_transaction(&self) -> Result<()>;

    /// Mark the innermost open level as successful
    fn set_transaction_successful(&self) -> Result<()>;

    /// Close the innermost level; the outermost close commits or rolls back
    fn end_transaction(&self) -> Result<()>;

    /// Whether the calling thread currently has a transaction open
    fn in_transaction(&self) -> bool;
}

/// Identity comparison of two store handles
///
/// Two operations may share one physical transaction only if they target the
/// very same store instance.
pub fn same_store(a: &Arc<dyn TransactionalStore>, b: &Arc<dyn TransactionalStore>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// RAII guard over one transaction level
///
/// Dropping a scope that was not finished ends the level without marking it,
/// which rolls the transaction back.
pub struct TransactionScope<'a> {
    store: &'a dyn TransactionalStore,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    pub fn begin(store: &'a dyn TransactionalStore) -> Result<Self> {
        store.begin_transaction()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    pub fn mark_successful(&mut self) -> Result<()> {
        self.store.set_transaction_successful()
    }

    /// End the level, surfacing commit failures to the caller
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.store.end_transaction()
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(err) = self.store.end_transaction()
        {
            warn!(error = %err, "failed to end abandoned transaction scope");
        }
    }
}

/// Run `work` inside one transaction level, committing only if it succeeds
pub fn run_in_transaction<T>(
    store: &dyn TransactionalStore,
    work: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let mut scope = TransactionScope::begin(store)?;
    let value = work()?;
    scope.mark_successful()?;
    scope.finish()?;
    Ok(value)
}
