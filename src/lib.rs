// ============================================================================
// RustMemoDAO Library
// ============================================================================
//
// Asynchronous data-access sessions: operations submitted from any thread
// run in order on one background worker, adjacent mergeable writes share a
// transaction, and callers observe completion by blocking, awaiting or
// listening.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod dao;
pub mod executor;
pub mod facade;
pub mod operation;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::AsyncSessionConfig;
pub use self::core::{AsyncDaoError, Column, DaoError, DataType, Result, Row, Schema, Value};
pub use dao::{AnyValue, Dao, Entity, MemoryDao, MemoryQuery, Query, TableEntity};
pub use executor::{
    AsyncOperationExecutor, AsyncOperationListener, ChannelMainContext, ExecutorStats,
    MainContext, MainLoop, ManualSpawner, ThreadSpawner, TokioBlockingSpawner, WorkerSpawner,
};
pub use facade::{AsyncSession, AsyncSessionBuilder, DaoSession};
pub use operation::{AsyncOperation, OperationFlags, OperationHandle, OperationType};
pub use storage::{MemoryStore, StoreStats, TransactionScope, TransactionalStore};
