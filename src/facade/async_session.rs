use super::DaoSession;
use crate::config::AsyncSessionConfig;
use crate::core::Result;
use crate::dao::{any_value, Entity, Query};
use crate::executor::{
    AsyncOperationExecutor, AsyncOperationListener, MainContext, ThreadSpawner, WorkerSpawner,
};
use crate::operation::{
    AsyncOperation, OperationFlags, OperationHandle, OperationType, Payload, Target,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Asynchronous interface to the DAOs of a [`DaoSession`]
///
/// Every call enqueues one operation and returns its handle immediately.
/// Operations of one session execute in call order on a single worker.
/// Cloning the session shares the executor.
///
/// ```ignore
/// let session = dao_session.start_async_session()?;
/// let key = session.insert(note)?.wait()?;
/// session.wait_for_completion()?;
/// ```
#[derive(Clone)]
pub struct AsyncSession {
    dao_session: Arc<DaoSession>,
    executor: AsyncOperationExecutor,
    session_flags: OperationFlags,
}

impl AsyncSession {
    pub fn builder(dao_session: Arc<DaoSession>) -> AsyncSessionBuilder {
        AsyncSessionBuilder {
            dao_session,
            config: AsyncSessionConfig::default(),
            spawner: None,
            main_context: None,
        }
    }

    /// A handle on the same executor whose calls also carry `flags`
    pub fn with_flags(&self, flags: OperationFlags) -> AsyncSession {
        AsyncSession {
            dao_session: Arc::clone(&self.dao_session),
            executor: self.executor.clone(),
            session_flags: self.session_flags | flags,
        }
    }

    pub fn session_flags(&self) -> OperationFlags {
        self.session_flags
    }

    pub fn dao_session(&self) -> &Arc<DaoSession> {
        &self.dao_session
    }

    pub fn executor(&self) -> &AsyncOperationExecutor {
        &self.executor
    }

    // ------------------------------------------------------------------------
    // Single-entity writes
    // ------------------------------------------------------------------------

    pub fn insert<E: Entity>(&self, entity: E) -> Result<OperationHandle<E::Key>> {
        self.enqueue_dao::<E, _>(OperationType::Insert, Payload::Entity(any_value(entity)))
    }

    pub fn insert_or_replace<E: Entity>(&self, entity: E) -> Result<OperationHandle<E::Key>> {
        self.enqueue_dao::<E, _>(
            OperationType::InsertOrReplace,
            Payload::Entity(any_value(entity)),
        )
    }

    pub fn update<E: Entity>(&self, entity: E) -> Result<OperationHandle<()>> {
        self.enqueue_dao::<E, _>(OperationType::Update, Payload::Entity(any_value(entity)))
    }

    pub fn delete<E: Entity>(&self, entity: E) -> Result<OperationHandle<()>> {
        self.enqueue_dao::<E, _>(OperationType::Delete, Payload::Entity(any_value(entity)))
    }

    pub fn delete_by_key<E: Entity>(&self, key: E::Key) -> Result<OperationHandle<()>> {
        self.enqueue_dao::<E, _>(OperationType::DeleteByKey, Payload::Key(any_value(key)))
    }

    pub fn delete_all<E: Entity>(&self) -> Result<OperationHandle<()>> {
        self.enqueue_dao::<E, _>(OperationType::DeleteAll, Payload::None)
    }

    // ------------------------------------------------------------------------
    // Batch writes, each in one transaction of the DAO's store
    // ------------------------------------------------------------------------

    pub fn insert_in_tx<E: Entity>(&self, entities: &[E]) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::InsertInTxArray, entities.to_vec())
    }

    pub fn insert_in_tx_iter<E: Entity>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::InsertInTxIterable, entities.into_iter().collect())
    }

    pub fn insert_or_replace_in_tx<E: Entity>(
        &self,
        entities: &[E],
    ) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::InsertOrReplaceInTxArray, entities.to_vec())
    }

    pub fn insert_or_replace_in_tx_iter<E: Entity>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) -> Result<OperationHandle<()>> {
        self.enqueue_batch(
            OperationType::InsertOrReplaceInTxIterable,
            entities.into_iter().collect(),
        )
    }

    pub fn update_in_tx<E: Entity>(&self, entities: &[E]) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::UpdateInTxArray, entities.to_vec())
    }

    pub fn update_in_tx_iter<E: Entity>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::UpdateInTxIterable, entities.into_iter().collect())
    }

    pub fn delete_in_tx<E: Entity>(&self, entities: &[E]) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::DeleteInTxArray, entities.to_vec())
    }

    pub fn delete_in_tx_iter<E: Entity>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) -> Result<OperationHandle<()>> {
        self.enqueue_batch(OperationType::DeleteInTxIterable, entities.into_iter().collect())
    }

    // ------------------------------------------------------------------------
    // Transactions on the session store
    // ------------------------------------------------------------------------

    /// Run `work` inside one transaction
    ///
    /// `work` may run more than once: a failed merged transaction is retried
    /// with each member alone.
    pub fn run_in_tx<F>(&self, work: F) -> Result<OperationHandle<()>>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.enqueue(
            OperationType::TransactionRunnable,
            Target::Store(Arc::clone(self.dao_session.store())),
            Payload::Runnable(Arc::new(work)),
        )
    }

    /// Run `work` inside one transaction and hand back its value
    pub fn call_in_tx<T, F>(&self, work: F) -> Result<OperationHandle<T>>
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.enqueue(
            OperationType::TransactionCallable,
            Target::Store(Arc::clone(self.dao_session.store())),
            Payload::Callable(Arc::new(move || work().map(any_value))),
        )
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn query_list<Q: Query>(&self, query: Q) -> Result<OperationHandle<Vec<Q::Entity>>> {
        self.enqueue(
            OperationType::QueryList,
            Target::Store(query.store()),
            Payload::Query(Arc::new(query)),
        )
    }

    /// The single match; the handle yields `None` when nothing matches
    pub fn query_unique<Q: Query>(&self, query: Q) -> Result<OperationHandle<Q::Entity>> {
        self.enqueue(
            OperationType::QueryUnique,
            Target::Store(query.store()),
            Payload::Query(Arc::new(query)),
        )
    }

    /// Entity stored under `key`; the handle yields `None` when absent
    pub fn load<E: Entity>(&self, key: E::Key) -> Result<OperationHandle<E>> {
        self.enqueue_dao::<E, _>(OperationType::Load, Payload::Key(any_value(key)))
    }

    pub fn load_all<E: Entity>(&self) -> Result<OperationHandle<Vec<E>>> {
        self.enqueue_dao::<E, _>(OperationType::LoadAll, Payload::None)
    }

    pub fn count<E: Entity>(&self) -> Result<OperationHandle<u64>> {
        self.enqueue_dao::<E, _>(OperationType::Count, Payload::None)
    }

    pub fn refresh<E: Entity>(&self, entity: E) -> Result<OperationHandle<E>> {
        self.enqueue_dao::<E, _>(OperationType::Refresh, Payload::Entity(any_value(entity)))
    }

    // ------------------------------------------------------------------------
    // Executor settings and aggregate waits
    // ------------------------------------------------------------------------

    pub fn max_operation_count_to_merge(&self) -> usize {
        self.executor.max_operation_count_to_merge()
    }

    pub fn set_max_operation_count_to_merge(&self, max: usize) -> Result<()> {
        self.executor.set_max_operation_count_to_merge(max)
    }

    pub fn wait_for_merge(&self) -> Duration {
        self.executor.wait_for_merge()
    }

    pub fn set_wait_for_merge(&self, wait: Duration) {
        self.executor.set_wait_for_merge(wait)
    }

    pub fn listener(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        self.executor.listener()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn AsyncOperationListener>>) {
        self.executor.set_listener(listener)
    }

    pub fn listener_main_thread(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        self.executor.listener_main_thread()
    }

    pub fn set_listener_main_thread(
        &self,
        listener: Option<Arc<dyn AsyncOperationListener>>,
    ) -> Result<()> {
        self.executor.set_listener_main_thread(listener)
    }

    /// Every operation enqueued so far has completed
    pub fn is_completed(&self) -> bool {
        self.executor.is_completed()
    }

    /// Block until every operation enqueued so far has completed
    ///
    /// Succeeds even if some operations failed; inspect their handles for that.
    pub fn wait_for_completion(&self) -> Result<()> {
        self.executor.wait_for_completion()
    }

    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Result<bool> {
        self.executor.wait_for_completion_timeout(timeout)
    }

    pub fn enqueued_count(&self) -> u64 {
        self.executor.enqueued_count()
    }

    pub fn completed_count(&self) -> u64 {
        self.executor.completed_count()
    }

    fn enqueue_batch<E: Entity>(
        &self,
        kind: OperationType,
        entities: Vec<E>,
    ) -> Result<OperationHandle<()>> {
        self.enqueue_dao::<E, _>(kind, Payload::Entities(any_value(entities)))
    }

    fn enqueue_dao<E: Entity, T>(
        &self,
        kind: OperationType,
        payload: Payload,
    ) -> Result<OperationHandle<T>> {
        let dao = self.dao_session.erased_dao::<E>()?;
        self.enqueue(kind, Target::Dao(dao), payload)
    }

    fn enqueue<T>(
        &self,
        kind: OperationType,
        target: Target,
        payload: Payload,
    ) -> Result<OperationHandle<T>> {
        let operation = AsyncOperation::new(kind, target, payload, self.session_flags);
        self.executor.enqueue(Arc::clone(&operation))?;
        Ok(OperationHandle::new(operation))
    }
}

impl std::fmt::Debug for AsyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSession")
            .field("session_flags", &self.session_flags)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Builder for [`AsyncSession`]
pub struct AsyncSessionBuilder {
    dao_session: Arc<DaoSession>,
    config: AsyncSessionConfig,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    main_context: Option<Arc<dyn MainContext>>,
}

impl AsyncSessionBuilder {
    pub fn config(mut self, config: AsyncSessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Execution resource for the worker; a dedicated thread by default
    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Context the main-thread listener is invoked through
    pub fn main_context(mut self, main_context: Arc<dyn MainContext>) -> Self {
        self.main_context = Some(main_context);
        self
    }

    pub fn build(self) -> Result<AsyncSession> {
        let spawner: Arc<dyn WorkerSpawner> = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(ThreadSpawner),
        };
        let executor = AsyncOperationExecutor::new(&self.config, spawner, self.main_context)?;

        Ok(AsyncSession {
            dao_session: self.dao_session,
            executor,
            session_flags: self.config.session_flags,
        })
    }
}
