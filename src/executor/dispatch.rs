use crate::core::{DaoError, Result};
use crate::dao::AnyValue;
use crate::operation::{AsyncOperation, OperationType};
use crate::storage::run_in_transaction;
use std::panic::{self, AssertUnwindSafe};

/// Run one operation against its collaborator and record the outcome
///
/// Records start and finish times; does not mark the operation completed.
/// A panicking collaborator is recorded as an `ExecutionError`.
pub(crate) fn execute_operation(operation: &AsyncOperation) {
    operation.begin_execution();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(operation)))
        .unwrap_or_else(|payload| Err(DaoError::ExecutionError(panic_message(payload.as_ref()))));
    operation.finish_execution(outcome);
}

fn dispatch(operation: &AsyncOperation) -> Result<Option<AnyValue>> {
    let payload = operation.payload();
    let target = operation.target();

    match operation.kind() {
        OperationType::Insert => target.dao()?.insert_any(payload.entity()?).map(Some),
        OperationType::InsertOrReplace => target
            .dao()?
            .insert_or_replace_any(payload.entity()?)
            .map(Some),
        OperationType::Update => target.dao()?.update_any(payload.entity()?).map(|_| None),
        OperationType::Delete => target.dao()?.delete_any(payload.entity()?).map(|_| None),
        OperationType::DeleteByKey => target.dao()?.delete_by_key_any(payload.key()?).map(|_| None),
        OperationType::DeleteAll => target.dao()?.delete_all_any().map(|_| None),
        OperationType::InsertInTxIterable | OperationType::InsertInTxArray => target
            .dao()?
            .insert_in_tx_any(payload.entities()?)
            .map(|_| None),
        OperationType::InsertOrReplaceInTxIterable | OperationType::InsertOrReplaceInTxArray => {
            target
                .dao()?
                .insert_or_replace_in_tx_any(payload.entities()?)
                .map(|_| None)
        }
        OperationType::UpdateInTxIterable | OperationType::UpdateInTxArray => target
            .dao()?
            .update_in_tx_any(payload.entities()?)
            .map(|_| None),
        OperationType::DeleteInTxIterable | OperationType::DeleteInTxArray => target
            .dao()?
            .delete_in_tx_any(payload.entities()?)
            .map(|_| None),
        OperationType::TransactionRunnable => {
            let runnable = payload.runnable()?;
            run_in_transaction(operation.store().as_ref(), || runnable()).map(|_| None)
        }
        OperationType::TransactionCallable => {
            let callable = payload.callable()?;
            run_in_transaction(operation.store().as_ref(), || callable()).map(Some)
        }
        OperationType::QueryList => payload.query()?.list_any().map(Some),
        OperationType::QueryUnique => payload.query()?.unique_any(),
        OperationType::Load => target.dao()?.load_any(payload.key()?),
        OperationType::LoadAll => target.dao()?.load_all_any().map(Some),
        OperationType::Count => target.dao()?.count_any().map(Some),
        OperationType::Refresh => target.dao()?.refresh_any(payload.entity()?).map(Some),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("operation panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("operation panicked: {}", message)
    } else {
        "operation panicked".to_string()
    }
}
