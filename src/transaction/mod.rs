// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transactions of the in-memory reference store.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: Reversible changes replayed on rollback
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{LevelOutcome, Transaction, TransactionId, TransactionState};
