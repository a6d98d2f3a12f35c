use crate::operation::AsyncOperation;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaoError {
    #[error("No DAO registered for entity '{0}'")]
    DaoNotRegistered(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Entity with key {key} not found in table '{table}'")]
    EntityNotFound { table: String, key: i64 },

    #[error("Entity in table '{0}' has no key")]
    MissingKey(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Query returned {0} results, expected at most one")]
    NonUniqueResult(usize),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DaoError>;

impl<T> From<std::sync::PoisonError<T>> for DaoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

/// Error surfaced to callers that wait on a failed asynchronous operation.
///
/// Carries the failed operation itself so callers can inspect its kind,
/// sequence number and timings alongside the cause.
#[derive(Error, Debug, Clone)]
#[error(
    "Async operation #{} ({}) failed: {source}",
    .operation.sequence_number(),
    .operation.kind()
)]
pub struct AsyncDaoError {
    operation: Arc<AsyncOperation>,
    #[source]
    source: DaoError,
}

impl AsyncDaoError {
    pub fn new(operation: Arc<AsyncOperation>, source: DaoError) -> Self {
        Self { operation, source }
    }

    /// The operation that produced the failure
    pub fn failed_operation(&self) -> &Arc<AsyncOperation> {
        &self.operation
    }

    /// The collaborator error recorded on the operation
    pub fn cause(&self) -> &DaoError {
        &self.source
    }

    pub fn into_cause(self) -> DaoError {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_error_maps_to_lock_error() {
        let mutex = std::sync::Mutex::new(0);
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = mutex.lock().unwrap();
                    panic!("poison");
                })
                .join()
        });

        let err: DaoError = mutex.lock().unwrap_err().into();
        assert!(matches!(err, DaoError::LockError(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = DaoError::EntityNotFound {
            table: "users".into(),
            key: 7,
        };
        assert_eq!(err.to_string(), "Entity with key 7 not found in table 'users'");
        assert_eq!(
            DaoError::NonUniqueResult(2).to_string(),
            "Query returned 2 results, expected at most one"
        );
    }
}
