// ============================================================================
// Asynchronous Operation Descriptor
// ============================================================================
//
// One unit of work submitted to an executor, plus the completion latch its
// callers wait on.
//
// Lifecycle: created -> queued -> running -> completed (success | failure).
// A descriptor executed inside a failed merged transaction is `reset` and
// re-executed alone before it is ever marked completed.
//
// The completion state lives under the descriptor's own mutex. Completion is
// broadcast exactly once: a condvar for blocking waiters and a watch channel
// for async waiters.
//
// ============================================================================

use super::kind::{Payload, Target};
use super::{OperationFlags, OperationType};
use crate::core::{AsyncDaoError, DaoError, Result};
use crate::dao::{downcast, AnyValue};
use crate::executor;
use crate::storage::{same_store, TransactionalStore};
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::warn;

#[derive(Default)]
struct CompletionState {
    time_started: Option<Instant>,
    time_completed: Option<Instant>,
    completed: bool,
    error: Option<DaoError>,
    result: Option<AnyValue>,
    merged_operations_count: usize,
}

/// A unit of work executed by an [`AsyncOperationExecutor`](crate::executor::AsyncOperationExecutor)
pub struct AsyncOperation {
    kind: OperationType,
    target: Target,
    payload: Payload,
    flags: OperationFlags,
    sequence_number: AtomicU64,
    /// Id of the executor the operation was enqueued on, 0 before enqueue
    owner: AtomicU64,
    creator_backtrace: Option<Backtrace>,
    state: Mutex<CompletionState>,
    completed_signal: Condvar,
    completed_watch: watch::Sender<bool>,
}

impl AsyncOperation {
    pub(crate) fn new(
        kind: OperationType,
        target: Target,
        payload: Payload,
        flags: OperationFlags,
    ) -> Arc<Self> {
        let creator_backtrace = flags
            .contains(OperationFlags::TRACK_CREATOR_STACKTRACE)
            .then(Backtrace::force_capture);
        let (completed_watch, _) = watch::channel(false);

        Arc::new(Self {
            kind,
            target,
            payload,
            flags,
            sequence_number: AtomicU64::new(0),
            owner: AtomicU64::new(0),
            creator_backtrace,
            state: Mutex::new(CompletionState::default()),
            completed_signal: Condvar::new(),
            completed_watch,
        })
    }

    pub fn kind(&self) -> OperationType {
        self.kind
    }

    pub fn flags(&self) -> OperationFlags {
        self.flags
    }

    pub fn is_merge_tx(&self) -> bool {
        self.flags.contains(OperationFlags::MERGE_TX)
    }

    /// Position in the executor's submission order; 0 if never enqueued
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number.load(Ordering::Acquire)
    }

    /// Call site that created the operation, if it was tracked
    pub fn creator_backtrace(&self) -> Option<&Backtrace> {
        self.creator_backtrace.as_ref()
    }

    /// The entity, entity list or key the operation was created with
    pub fn parameter<T: Any>(&self) -> Option<&T> {
        self.payload
            .value()
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Store the operation runs against
    pub fn store(&self) -> Arc<dyn TransactionalStore> {
        self.target.store()
    }

    /// Both operations allow merging and run against the same store instance
    pub fn is_mergeable_with(&self, other: &AsyncOperation) -> bool {
        self.is_merge_tx() && other.is_merge_tx() && same_store(&self.store(), &other.store())
    }

    pub fn is_completed(&self) -> bool {
        self.lock_state().completed
    }

    pub fn is_failed(&self) -> bool {
        let state = self.lock_state();
        state.completed && state.error.is_some()
    }

    pub fn is_completed_successfully(&self) -> bool {
        let state = self.lock_state();
        state.completed && state.error.is_none()
    }

    pub fn error(&self) -> Option<DaoError> {
        self.lock_state().error.clone()
    }

    /// Size of the merged transaction this operation committed in, 0 otherwise
    pub fn merged_operations_count(&self) -> usize {
        self.lock_state().merged_operations_count
    }

    pub fn time_started(&self) -> Option<Instant> {
        self.lock_state().time_started
    }

    pub fn time_completed(&self) -> Option<Instant> {
        self.lock_state().time_completed
    }

    /// Execution time of this operation alone
    pub fn duration(&self) -> Result<Duration> {
        let state = self.lock_state();
        match (state.completed, state.time_started, state.time_completed) {
            (true, Some(started), Some(completed)) => Ok(completed.duration_since(started)),
            _ => Err(DaoError::ProtocolMisuse(format!(
                "operation #{} has not completed yet",
                self.sequence_number()
            ))),
        }
    }

    /// Block until the operation completes, whatever its outcome
    pub fn wait_for_completion(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.completed {
            return Ok(());
        }
        self.ensure_not_own_worker()?;

        while !state.completed {
            state = self
                .completed_signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Wait at most `timeout`; `Ok(false)` if still pending afterwards
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Result<bool> {
        let state = self.lock_state();
        if state.completed || timeout.is_zero() {
            return Ok(state.completed);
        }
        self.ensure_not_own_worker()?;

        let (state, _) = self
            .completed_signal
            .wait_timeout_while(state, timeout, |state| !state.completed)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.completed)
    }

    /// Wait for completion without blocking an async runtime thread
    pub async fn completed(&self) {
        let mut receiver = self.completed_watch.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = receiver.wait_for(|completed| *completed).await;
    }

    /// Block until completed and return the result or the stored failure
    pub fn result(self: &Arc<Self>) -> std::result::Result<Option<AnyValue>, AsyncDaoError> {
        self.wait_for_completion()
            .map_err(|err| AsyncDaoError::new(Arc::clone(self), err))?;
        self.outcome()
    }

    pub async fn result_async(
        self: &Arc<Self>,
    ) -> std::result::Result<Option<AnyValue>, AsyncDaoError> {
        self.completed().await;
        self.outcome()
    }

    /// Like [`result`](Self::result), downcast to the expected type
    pub fn result_as<T: Any + Clone>(self: &Arc<Self>) -> std::result::Result<Option<T>, AsyncDaoError> {
        let value = self.result()?;
        self.downcast_result(value)
    }

    pub(crate) fn downcast_result<T: Any + Clone>(
        self: &Arc<Self>,
        value: Option<AnyValue>,
    ) -> std::result::Result<Option<T>, AsyncDaoError> {
        value
            .map(|value| downcast::<T>(&value).cloned())
            .transpose()
            .map_err(|err| AsyncDaoError::new(Arc::clone(self), err))
    }

    fn outcome(self: &Arc<Self>) -> std::result::Result<Option<AnyValue>, AsyncDaoError> {
        let state = self.lock_state();
        match &state.error {
            Some(err) => Err(AsyncDaoError::new(Arc::clone(self), err.clone())),
            None => Ok(state.result.clone()),
        }
    }

    // ------------------------------------------------------------------------
    // Executor side
    // ------------------------------------------------------------------------

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Claim the operation for an executor; an operation is enqueued only once
    pub(crate) fn assign(&self, executor_id: u64, sequence_number: u64) -> Result<()> {
        self.owner
            .compare_exchange(0, executor_id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                DaoError::ProtocolMisuse(format!(
                    "operation #{} ({}) was already enqueued",
                    self.sequence_number(),
                    self.kind
                ))
            })?;
        self.sequence_number.store(sequence_number, Ordering::Release);
        Ok(())
    }

    /// Undo [`assign`](Self::assign) when the enqueue could not go through
    pub(crate) fn unassign(&self) {
        self.sequence_number.store(0, Ordering::Release);
        self.owner.store(0, Ordering::Release);
    }

    pub(crate) fn begin_execution(&self) {
        self.lock_state().time_started = Some(Instant::now());
    }

    pub(crate) fn finish_execution(&self, outcome: Result<Option<AnyValue>>) {
        let mut state = self.lock_state();
        state.time_completed = Some(Instant::now());
        match outcome {
            Ok(result) => state.result = result,
            Err(err) => state.error = Some(err),
        }
    }

    /// Whether the last execution attempt failed
    pub(crate) fn execution_failed(&self) -> bool {
        self.lock_state().error.is_some()
    }

    pub(crate) fn set_merged_operations_count(&self, count: usize) {
        self.lock_state().merged_operations_count = count;
    }

    /// Release every waiter; a second call is ignored
    pub(crate) fn mark_completed(&self) {
        {
            let mut state = self.lock_state();
            if state.completed {
                warn!(
                    seq = self.sequence_number(),
                    kind = %self.kind,
                    "operation already completed, ignoring"
                );
                return;
            }
            state.completed = true;
        }
        self.completed_signal.notify_all();
        self.completed_watch.send_replace(true);
    }

    /// Clear the execution state of a merged member before it is retried alone
    pub(crate) fn reset(&self) {
        let mut state = self.lock_state();
        if state.completed {
            warn!(seq = self.sequence_number(), "cannot reset a completed operation");
            return;
        }
        *state = CompletionState::default();
    }

    fn ensure_not_own_worker(&self) -> Result<()> {
        let owner = self.owner.load(Ordering::Acquire);
        if owner != 0 && executor::is_worker_of(owner) {
            return Err(DaoError::ProtocolMisuse(format!(
                "waiting on pending operation #{} from its own executor's worker thread would deadlock",
                self.sequence_number()
            )));
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("AsyncOperation")
            .field("kind", &self.kind)
            .field("sequence_number", &self.sequence_number())
            .field("flags", &self.flags)
            .field("completed", &state.completed)
            .field("error", &state.error)
            .field("merged_operations_count", &state.merged_operations_count)
            .finish()
    }
}
