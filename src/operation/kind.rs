use crate::core::{DaoError, Result};
use crate::dao::{AnyValue, ErasedDao, ErasedQuery};
use crate::storage::TransactionalStore;
use std::fmt;
use std::sync::Arc;

/// What an asynchronous operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    InsertInTxIterable,
    InsertInTxArray,
    InsertOrReplace,
    InsertOrReplaceInTxIterable,
    InsertOrReplaceInTxArray,
    Update,
    UpdateInTxIterable,
    UpdateInTxArray,
    Delete,
    DeleteInTxIterable,
    DeleteInTxArray,
    DeleteByKey,
    DeleteAll,
    TransactionRunnable,
    TransactionCallable,
    QueryList,
    QueryUnique,
    Load,
    LoadAll,
    Count,
    Refresh,
}

impl OperationType {
    /// Whether the operation runs against a store rather than a DAO
    pub fn targets_store(&self) -> bool {
        matches!(
            self,
            OperationType::TransactionRunnable
                | OperationType::TransactionCallable
                | OperationType::QueryList
                | OperationType::QueryUnique
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Insert => "Insert",
            OperationType::InsertInTxIterable => "InsertInTxIterable",
            OperationType::InsertInTxArray => "InsertInTxArray",
            OperationType::InsertOrReplace => "InsertOrReplace",
            OperationType::InsertOrReplaceInTxIterable => "InsertOrReplaceInTxIterable",
            OperationType::InsertOrReplaceInTxArray => "InsertOrReplaceInTxArray",
            OperationType::Update => "Update",
            OperationType::UpdateInTxIterable => "UpdateInTxIterable",
            OperationType::UpdateInTxArray => "UpdateInTxArray",
            OperationType::Delete => "Delete",
            OperationType::DeleteInTxIterable => "DeleteInTxIterable",
            OperationType::DeleteInTxArray => "DeleteInTxArray",
            OperationType::DeleteByKey => "DeleteByKey",
            OperationType::DeleteAll => "DeleteAll",
            OperationType::TransactionRunnable => "TransactionRunnable",
            OperationType::TransactionCallable => "TransactionCallable",
            OperationType::QueryList => "QueryList",
            OperationType::QueryUnique => "QueryUnique",
            OperationType::Load => "Load",
            OperationType::LoadAll => "LoadAll",
            OperationType::Count => "Count",
            OperationType::Refresh => "Refresh",
        };
        write!(f, "{}", name)
    }
}

pub(crate) type Runnable = Arc<dyn Fn() -> Result<()> + Send + Sync>;
pub(crate) type Callable = Arc<dyn Fn() -> Result<AnyValue> + Send + Sync>;

/// Collaborator an operation is executed against
#[derive(Clone)]
pub(crate) enum Target {
    Dao(Arc<dyn ErasedDao>),
    Store(Arc<dyn TransactionalStore>),
}

impl Target {
    pub(crate) fn store(&self) -> Arc<dyn TransactionalStore> {
        match self {
            Target::Dao(dao) => dao.target_store(),
            Target::Store(store) => Arc::clone(store),
        }
    }

    pub(crate) fn dao(&self) -> Result<&Arc<dyn ErasedDao>> {
        match self {
            Target::Dao(dao) => Ok(dao),
            Target::Store(_) => Err(DaoError::ProtocolMisuse(
                "operation targets a store, not a DAO".into(),
            )),
        }
    }
}

/// Input of an operation
#[derive(Clone)]
pub(crate) enum Payload {
    None,
    Entity(AnyValue),
    Entities(AnyValue),
    Key(AnyValue),
    Query(Arc<dyn ErasedQuery>),
    Runnable(Runnable),
    Callable(Callable),
}

impl Payload {
    /// The user-visible parameter value, if the payload carries one
    pub(crate) fn value(&self) -> Option<&AnyValue> {
        match self {
            Payload::Entity(value) | Payload::Entities(value) | Payload::Key(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn entity(&self) -> Result<&AnyValue> {
        match self {
            Payload::Entity(value) => Ok(value),
            other => Err(other.mismatch("an entity")),
        }
    }

    pub(crate) fn entities(&self) -> Result<&AnyValue> {
        match self {
            Payload::Entities(value) => Ok(value),
            other => Err(other.mismatch("an entity list")),
        }
    }

    pub(crate) fn key(&self) -> Result<&AnyValue> {
        match self {
            Payload::Key(value) => Ok(value),
            other => Err(other.mismatch("a key")),
        }
    }

    pub(crate) fn query(&self) -> Result<&Arc<dyn ErasedQuery>> {
        match self {
            Payload::Query(query) => Ok(query),
            other => Err(other.mismatch("a query")),
        }
    }

    pub(crate) fn runnable(&self) -> Result<&Runnable> {
        match self {
            Payload::Runnable(runnable) => Ok(runnable),
            other => Err(other.mismatch("a runnable")),
        }
    }

    pub(crate) fn callable(&self) -> Result<&Callable> {
        match self {
            Payload::Callable(callable) => Ok(callable),
            other => Err(other.mismatch("a callable")),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Payload::None => "nothing",
            Payload::Entity(_) => "an entity",
            Payload::Entities(_) => "an entity list",
            Payload::Key(_) => "a key",
            Payload::Query(_) => "a query",
            Payload::Runnable(_) => "a runnable",
            Payload::Callable(_) => "a callable",
        }
    }

    fn mismatch(&self, expected: &str) -> DaoError {
        DaoError::ProtocolMisuse(format!(
            "operation payload is {}, expected {}",
            self.name(),
            expected
        ))
    }
}
