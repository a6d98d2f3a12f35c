use super::dispatch::{execute_operation, panic_message};
use super::ExecutorShared;
use crate::operation::AsyncOperation;
use crate::storage::{TransactionScope, TransactionalStore};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

thread_local! {
    /// Id of the executor whose worker runs on this thread, 0 if none
    static CURRENT_EXECUTOR: Cell<u64> = const { Cell::new(0) };
}

/// Whether the calling thread is currently draining the given executor
pub(crate) fn is_worker_of(executor_id: u64) -> bool {
    CURRENT_EXECUTOR.with(|current| current.get() == executor_id)
}

/// Marks the thread as the executor's worker and releases the running flag
/// if the drain loop is left without retiring through the idle check
struct DrainGuard<'a> {
    shared: &'a ExecutorShared,
    previous: u64,
    retired: bool,
}

impl<'a> DrainGuard<'a> {
    fn enter(shared: &'a ExecutorShared) -> Self {
        let previous = CURRENT_EXECUTOR.with(|current| current.replace(shared.id));
        Self {
            shared,
            previous,
            retired: false,
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        CURRENT_EXECUTOR.with(|current| current.set(self.previous));
        if !self.retired {
            warn!(
                executor = self.shared.id,
                panicking = thread::panicking(),
                "worker stopped abnormally, releasing queue"
            );
            self.shared.lock_state().running = false;
        }
    }
}

/// Body of one drain cycle
pub(super) fn run(shared: Arc<ExecutorShared>) {
    let mut guard = DrainGuard::enter(&shared);
    debug!(executor = shared.id, "worker started");
    drain(&shared);
    guard.retired = true;
    debug!(executor = shared.id, "worker idle, exiting");
}

fn drain(shared: &ExecutorShared) {
    while let Some(operation) = next_or_retire(shared) {
        if !operation.is_merge_tx() {
            execute_and_complete(shared, &operation);
            continue;
        }

        match poll(shared, shared.wait_for_merge()) {
            Some(second) if operation.is_mergeable_with(&second) => {
                merge_tx_and_execute(shared, operation, second)
            }
            Some(second) => {
                execute_and_complete(shared, &operation);
                execute_and_complete(shared, &second);
            }
            None => execute_and_complete(shared, &operation),
        }
    }
}

/// Pop the next operation, waiting up to `timeout` for one to arrive
fn poll(shared: &ExecutorShared, timeout: Duration) -> Option<Arc<AsyncOperation>> {
    let mut state = shared.lock_state();
    if state.queue.is_empty() && !timeout.is_zero() {
        state = shared
            .work_available
            .wait_timeout_while(state, timeout, |state| state.queue.is_empty())
            .map(|(state, _)| state)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
    }
    state.queue.pop_front()
}

/// Like [`poll`] with the idle interval, but clears the running flag in the
/// same critical section that finds the queue empty
fn next_or_retire(shared: &ExecutorShared) -> Option<Arc<AsyncOperation>> {
    if let Some(operation) = poll(shared, shared.drain_poll_interval) {
        return Some(operation);
    }

    let mut state = shared.lock_state();
    let next = state.queue.pop_front();
    if next.is_none() {
        state.running = false;
    }
    next
}

fn execute_and_complete(shared: &ExecutorShared, operation: &Arc<AsyncOperation>) {
    execute_operation(operation);
    handle_operation_completed(shared, operation);
}

fn merge_tx_and_execute(
    shared: &ExecutorShared,
    first: Arc<AsyncOperation>,
    second: Arc<AsyncOperation>,
) {
    let mut batch = vec![first, second];
    let store = batch[0].store();

    if execute_merged(shared, store.as_ref(), &mut batch) {
        let count = batch.len();
        debug!(executor = shared.id, count, "merged transaction committed");
        for operation in &batch {
            operation.set_merged_operations_count(count);
        }
        for operation in &batch {
            handle_operation_completed(shared, operation);
        }
        return;
    }

    info!(
        executor = shared.id,
        count = batch.len(),
        "merged transaction failed, reverting and running operations individually"
    );
    for operation in &batch {
        operation.reset();
    }
    for operation in &batch {
        execute_and_complete(shared, operation);
    }
}

/// Run the batch in one transaction, pulling further mergeable operations
/// off the queue head; returns whether the transaction committed
fn execute_merged(
    shared: &ExecutorShared,
    store: &dyn TransactionalStore,
    batch: &mut Vec<Arc<AsyncOperation>>,
) -> bool {
    let mut scope = match TransactionScope::begin(store) {
        Ok(scope) => scope,
        Err(err) => {
            warn!(executor = shared.id, error = %err, "could not begin merged transaction");
            return false;
        }
    };

    let mut index = 0;
    while index < batch.len() {
        let operation = Arc::clone(&batch[index]);
        execute_operation(&operation);
        if operation.execution_failed() {
            // Dropping the scope rolls the transaction back
            return false;
        }
        index += 1;

        if index == batch.len() && batch.len() < shared.max_operation_count_to_merge() {
            let mut state = shared.lock_state();
            if state
                .queue
                .front()
                .is_some_and(|next| operation.is_mergeable_with(next))
                && let Some(next) = state.queue.pop_front()
            {
                batch.push(next);
            }
        }
    }

    if let Err(err) = scope.mark_successful() {
        warn!(executor = shared.id, error = %err, "could not mark merged transaction successful");
        return false;
    }
    match scope.finish() {
        Ok(()) => true,
        Err(err) => {
            warn!(executor = shared.id, error = %err, "merged transaction did not commit");
            false
        }
    }
}

/// Completion order: latch, worker listener, main-thread listener, counter
fn handle_operation_completed(shared: &ExecutorShared, operation: &Arc<AsyncOperation>) {
    operation.mark_completed();

    if let Some(listener) = shared.listener() {
        guarded(shared, operation, "completion listener", || {
            listener.on_async_operation_completed(operation)
        });
    }

    if let Some(listener) = shared.listener_main_thread()
        && let Some(main_context) = &shared.main_context
    {
        guarded(shared, operation, "main context post", || {
            let posted = Arc::clone(operation);
            let task = Box::new(move || listener.on_async_operation_completed(&posted));
            if let Err(err) = main_context.post(task) {
                warn!(executor = shared.id, error = %err, "could not post completion to main context");
            }
        });
    }

    // Counted even when a notification step panicked
    let mut state = shared.lock_state();
    state.completed += 1;
    if state.completed == state.enqueued {
        shared.all_completed.notify_all();
    }
}

/// Run a notification step, logging instead of unwinding out of the worker
fn guarded<F: FnOnce()>(shared: &ExecutorShared, operation: &AsyncOperation, step: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            executor = shared.id,
            seq = operation.sequence_number(),
            "{} panicked: {}",
            step,
            panic_message(payload.as_ref())
        );
    }
}
