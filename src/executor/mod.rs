// ============================================================================
// Asynchronous Operation Executor
// ============================================================================
//
// Single-worker queue for operations submitted from any thread.
//
// - Operations run strictly in submission order on at most one worker.
// - Adjacent MERGE_TX operations on the same store share one transaction;
//   if that transaction fails, every member is retried alone.
// - The worker is started lazily through an injected `WorkerSpawner` and
//   exits after an idle poll interval.
//
// One mutex guards the queue, the running flag and the aggregate counters,
// so the worker's final "queue is empty" check and clearing the running flag
// happen atomically with respect to `enqueue`.
//
// ============================================================================

mod dispatch;
pub mod listener;
pub mod spawner;
mod worker;

pub use listener::{AsyncOperationListener, ChannelMainContext, MainContext, MainLoop, MainTask};
pub use spawner::{ManualSpawner, ThreadSpawner, TokioBlockingSpawner, WorkerJob, WorkerSpawner};
pub(crate) use worker::is_worker_of;

use crate::config::AsyncSessionConfig;
use crate::core::{DaoError, Result};
use crate::operation::AsyncOperation;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub enqueued: u64,
    pub completed: u64,
    /// Operations waiting in the queue
    pub queued: usize,
    /// Whether a worker is currently draining
    pub running: bool,
    /// Drain cycles started so far
    pub workers_started: u64,
}

#[derive(Default)]
struct ExecutorState {
    queue: VecDeque<Arc<AsyncOperation>>,
    running: bool,
    last_sequence_number: u64,
    enqueued: u64,
    completed: u64,
    workers_started: u64,
}

type ListenerSlot = RwLock<Option<Arc<dyn AsyncOperationListener>>>;

struct ExecutorShared {
    id: u64,
    state: Mutex<ExecutorState>,
    work_available: Condvar,
    all_completed: Condvar,
    max_operation_count_to_merge: AtomicUsize,
    wait_for_merge_micros: AtomicU64,
    drain_poll_interval: Duration,
    worker_name: String,
    listener: ListenerSlot,
    listener_main_thread: ListenerSlot,
    main_context: Option<Arc<dyn MainContext>>,
    spawner: Arc<dyn WorkerSpawner>,
}

impl ExecutorShared {
    /// Worker-side lock; a poisoned state is recovered so the queue keeps draining
    fn lock_state(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_operation_count_to_merge(&self) -> usize {
        self.max_operation_count_to_merge.load(Ordering::Relaxed)
    }

    fn wait_for_merge(&self) -> Duration {
        Duration::from_micros(self.wait_for_merge_micros.load(Ordering::Relaxed))
    }

    fn listener(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        read_slot(&self.listener)
    }

    fn listener_main_thread(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        read_slot(&self.listener_main_thread)
    }
}

fn read_slot(slot: &ListenerSlot) -> Option<Arc<dyn AsyncOperationListener>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write_slot(slot: &ListenerSlot, listener: Option<Arc<dyn AsyncOperationListener>>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = listener;
}

/// Queue plus lazily started worker executing [`AsyncOperation`]s
#[derive(Clone)]
pub struct AsyncOperationExecutor {
    shared: Arc<ExecutorShared>,
}

impl AsyncOperationExecutor {
    pub fn new(
        config: &AsyncSessionConfig,
        spawner: Arc<dyn WorkerSpawner>,
        main_context: Option<Arc<dyn MainContext>>,
    ) -> Result<Self> {
        config.validate().map_err(DaoError::ProtocolMisuse)?;

        let shared = ExecutorShared {
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ExecutorState::default()),
            work_available: Condvar::new(),
            all_completed: Condvar::new(),
            max_operation_count_to_merge: AtomicUsize::new(config.max_operation_count_to_merge),
            wait_for_merge_micros: AtomicU64::new(duration_micros(config.wait_for_merge)),
            drain_poll_interval: config.drain_poll_interval,
            worker_name: config.worker_name.clone(),
            listener: RwLock::new(None),
            listener_main_thread: RwLock::new(None),
            main_context,
            spawner,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Queue an operation, starting a worker if none is running
    pub fn enqueue(&self, operation: Arc<AsyncOperation>) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock()?;

        let sequence_number = state.last_sequence_number + 1;
        operation.assign(shared.id, sequence_number)?;
        state.last_sequence_number = sequence_number;
        state.queue.push_back(Arc::clone(&operation));
        state.enqueued += 1;
        shared.work_available.notify_one();

        if !state.running {
            state.running = true;
            let worker_shared = Arc::clone(shared);
            let job = Box::new(move || worker::run(worker_shared));
            if let Err(err) = shared.spawner.spawn(&shared.worker_name, job) {
                // Nothing will drain the queue: take this operation back out.
                state.running = false;
                state.queue.pop_back();
                state.enqueued -= 1;
                state.last_sequence_number -= 1;
                operation.unassign();
                return Err(err);
            }
            state.workers_started += 1;
            debug!(executor = shared.id, "worker requested");
        }
        Ok(())
    }

    pub fn max_operation_count_to_merge(&self) -> usize {
        self.shared.max_operation_count_to_merge()
    }

    pub fn set_max_operation_count_to_merge(&self, max: usize) -> Result<()> {
        if max < 2 {
            return Err(DaoError::ProtocolMisuse(format!(
                "max_operation_count_to_merge must be >= 2, got {}",
                max
            )));
        }
        self.shared
            .max_operation_count_to_merge
            .store(max, Ordering::Relaxed);
        Ok(())
    }

    pub fn wait_for_merge(&self) -> Duration {
        self.shared.wait_for_merge()
    }

    pub fn set_wait_for_merge(&self, wait: Duration) {
        self.shared
            .wait_for_merge_micros
            .store(duration_micros(wait), Ordering::Relaxed);
    }

    pub fn listener(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        self.shared.listener()
    }

    /// Listener called on the worker thread right after each completion
    pub fn set_listener(&self, listener: Option<Arc<dyn AsyncOperationListener>>) {
        write_slot(&self.shared.listener, listener);
    }

    pub fn listener_main_thread(&self) -> Option<Arc<dyn AsyncOperationListener>> {
        self.shared.listener_main_thread()
    }

    /// Listener invoked through the main context after each completion
    pub fn set_listener_main_thread(
        &self,
        listener: Option<Arc<dyn AsyncOperationListener>>,
    ) -> Result<()> {
        if listener.is_some() && self.shared.main_context.is_none() {
            return Err(DaoError::ProtocolMisuse(
                "no main context configured for a main-thread listener".into(),
            ));
        }
        write_slot(&self.shared.listener_main_thread, listener);
        Ok(())
    }

    /// Every enqueued operation has completed
    pub fn is_completed(&self) -> bool {
        let state = self.shared.lock_state();
        state.enqueued == state.completed
    }

    /// Block until every enqueued operation has completed
    pub fn wait_for_completion(&self) -> Result<()> {
        let mut state = self.shared.state.lock()?;
        if state.enqueued != state.completed {
            self.ensure_not_own_worker()?;
        }
        while state.enqueued != state.completed {
            state = self.shared.all_completed.wait(state)?;
        }
        Ok(())
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion), giving up after `timeout`
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Result<bool> {
        let state = self.shared.state.lock()?;
        if state.enqueued == state.completed || timeout.is_zero() {
            return Ok(state.enqueued == state.completed);
        }
        self.ensure_not_own_worker()?;

        let (state, _) = self
            .shared
            .all_completed
            .wait_timeout_while(state, timeout, |state| state.enqueued != state.completed)?;
        Ok(state.enqueued == state.completed)
    }

    pub fn enqueued_count(&self) -> u64 {
        self.shared.lock_state().enqueued
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.lock_state().completed
    }

    pub fn stats(&self) -> ExecutorStats {
        let state = self.shared.lock_state();
        ExecutorStats {
            enqueued: state.enqueued,
            completed: state.completed,
            queued: state.queue.len(),
            running: state.running,
            workers_started: state.workers_started,
        }
    }

    fn ensure_not_own_worker(&self) -> Result<()> {
        if is_worker_of(self.shared.id) {
            return Err(DaoError::ProtocolMisuse(
                "waiting for the executor to drain from its own worker thread would deadlock"
                    .into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for AsyncOperationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperationExecutor")
            .field("id", &self.shared.id)
            .field("worker_name", &self.shared.worker_name)
            .field("stats", &self.stats())
            .finish()
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
