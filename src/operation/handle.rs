use super::AsyncOperation;
use crate::core::AsyncDaoError;
use std::any::Any;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Typed view of an enqueued operation
///
/// Dereferences to the underlying [`AsyncOperation`]. `T` is the type of the
/// operation's result: a key for inserts, an entity for loads, `()` for
/// writes without a result.
pub struct OperationHandle<T> {
    operation: Arc<AsyncOperation>,
    _result: PhantomData<fn() -> T>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(operation: Arc<AsyncOperation>) -> Self {
        Self {
            operation,
            _result: PhantomData,
        }
    }

    pub fn operation(&self) -> &Arc<AsyncOperation> {
        &self.operation
    }

    pub fn into_operation(self) -> Arc<AsyncOperation> {
        self.operation
    }
}

impl<T: Any + Clone> OperationHandle<T> {
    /// Block until completed; `Ok(None)` when the operation has no result
    /// (writes, or a load that found nothing)
    pub fn wait(&self) -> Result<Option<T>, AsyncDaoError> {
        self.operation.result_as::<T>()
    }

    pub async fn wait_async(&self) -> Result<Option<T>, AsyncDaoError> {
        let value = self.operation.result_async().await?;
        self.operation.downcast_result(value)
    }
}

impl<T> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.operation))
    }
}

impl<T> Deref for OperationHandle<T> {
    type Target = AsyncOperation;

    fn deref(&self) -> &AsyncOperation {
        &self.operation
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.operation, f)
    }
}
