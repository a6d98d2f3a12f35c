use super::store::TransactionalStore;
use super::Table;
use crate::core::{DaoError, Result, Row, Schema};
use crate::transaction::{Change, LevelOutcome, Transaction, TransactionId};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Counters of finished transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Outermost transactions that committed
    pub commits: u64,
    /// Outermost transactions that rolled back
    pub rollbacks: u64,
    /// Writes applied outside any transaction
    pub autocommits: u64,
}

struct ActiveTransaction {
    owner: ThreadId,
    transaction: Transaction,
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    active: Option<ActiveTransaction>,
    stats: StoreStats,
    fail_next_commit: bool,
}

/// In-memory single-writer store with nested transactions
///
/// Writes inside a transaction are applied immediately and recorded in an
/// undo log; rollback replays the log backwards. At most one transaction is
/// open at a time: `begin_transaction` and writes from any other thread block
/// until it ends. Reads never block and may observe uncommitted rows of the
/// open transaction.
pub struct MemoryStore {
    name: String,
    state: Mutex<StoreState>,
    released: Condvar,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(StoreState::default()),
            released: Condvar::new(),
        }
    }

    /// Convenience constructor returning a shared handle
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.tables.contains_key(name) {
            return Err(DaoError::TableExists(name.to_string()));
        }
        state.tables.insert(name.to_string(), Table::new(name, schema));
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock()?.tables.contains_key(name))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.state.lock()?.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let state = self.state.lock()?;
        Ok(table_ref(&state.tables, table)?.len())
    }

    pub fn get_row(&self, table: &str, key: i64) -> Result<Option<Row>> {
        let state = self.state.lock()?;
        Ok(table_ref(&state.tables, table)?.get(key).cloned())
    }

    /// All rows of a table in ascending key order
    pub fn scan(&self, table: &str) -> Result<Vec<(i64, Row)>> {
        let state = self.state.lock()?;
        Ok(table_ref(&state.tables, table)?
            .scan()
            .map(|(key, row)| (key, row.clone()))
            .collect())
    }

    pub fn insert_row(&self, table: &str, key: Option<i64>, row: Row) -> Result<i64> {
        self.write(|tables| {
            let key = table_mut(tables, table)?.insert(key, row)?;
            Ok((
                key,
                Change::InsertRow {
                    table: table.to_string(),
                    key,
                },
            ))
        })
    }

    pub fn upsert_row(&self, table: &str, key: Option<i64>, row: Row) -> Result<i64> {
        self.write(|tables| {
            let (key, old) = table_mut(tables, table)?.upsert(key, row)?;
            let change = match old {
                Some(old_row) => Change::UpdateRow {
                    table: table.to_string(),
                    key,
                    old_row,
                },
                None => Change::InsertRow {
                    table: table.to_string(),
                    key,
                },
            };
            Ok((key, change))
        })
    }

    pub fn update_row(&self, table: &str, key: i64, row: Row) -> Result<()> {
        self.write(|tables| {
            let old_row = table_mut(tables, table)?.update(key, row)?;
            Ok((
                (),
                Change::UpdateRow {
                    table: table.to_string(),
                    key,
                    old_row,
                },
            ))
        })
    }

    /// Delete a row; deleting a missing key is not an error
    pub fn delete_row(&self, table: &str, key: i64) -> Result<bool> {
        self.write_optional(|tables| {
            let removed = table_mut(tables, table)?.delete(key);
            Ok(match removed {
                Some(old_row) => (
                    true,
                    Some(Change::DeleteRow {
                        table: table.to_string(),
                        key,
                        old_row,
                    }),
                ),
                None => (false, None),
            })
        })
    }

    pub fn clear_table(&self, table: &str) -> Result<usize> {
        self.write(|tables| {
            let rows = table_mut(tables, table)?.clear();
            Ok((
                rows.len(),
                Change::ClearTable {
                    table: table.to_string(),
                    rows,
                },
            ))
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.state.lock()?.stats)
    }

    /// Make the next outermost commit fail and roll back instead
    pub fn inject_commit_failure(&self) -> Result<()> {
        self.state.lock()?.fail_next_commit = true;
        Ok(())
    }

    fn write<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, Table>) -> Result<(T, Change)>,
    ) -> Result<T> {
        self.write_optional(|tables| apply(tables).map(|(value, change)| (value, Some(change))))
    }

    fn write_optional<T>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, Table>) -> Result<(T, Option<Change>)>,
    ) -> Result<T> {
        let me = thread::current().id();
        let mut state = self.wait_for_writer_slot(self.state.lock()?, me)?;

        let (value, change) = apply(&mut state.tables)?;
        let state = &mut *state;
        match state.active.as_mut() {
            Some(active) => {
                if let Some(change) = change {
                    active.transaction.record_change(change)?;
                }
            }
            None => state.stats.autocommits += 1,
        }
        Ok(value)
    }

    /// Block while a transaction owned by another thread is open
    fn wait_for_writer_slot<'a>(
        &self,
        mut state: MutexGuard<'a, StoreState>,
        me: ThreadId,
    ) -> Result<MutexGuard<'a, StoreState>> {
        while state
            .active
            .as_ref()
            .is_some_and(|active| active.owner != me)
        {
            state = self.released.wait(state)?;
        }
        Ok(state)
    }

    fn owned_transaction<'a>(
        state: &'a mut StoreState,
        action: &str,
    ) -> Result<&'a mut ActiveTransaction> {
        let me = thread::current().id();
        match state.active.as_mut() {
            Some(active) if active.owner == me => Ok(active),
            _ => Err(DaoError::TransactionError(format!(
                "cannot {}: no transaction open on this thread",
                action
            ))),
        }
    }
}

impl TransactionalStore for MemoryStore {
    fn begin_transaction(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.wait_for_writer_slot(self.state.lock()?, me)?;

        match state.active.as_mut() {
            Some(active) => active.transaction.push_level(),
            None => {
                let transaction = Transaction::new(TransactionId::new());
                debug!(store = %self.name, txn = %transaction.id(), "transaction started");
                state.active = Some(ActiveTransaction {
                    owner: me,
                    transaction,
                });
                Ok(())
            }
        }
    }

    fn set_transaction_successful(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        Self::owned_transaction(&mut state, "mark transaction successful")?
            .transaction
            .mark_successful()
    }

    fn end_transaction(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        let transaction = &mut Self::owned_transaction(&mut state, "end transaction")?.transaction;
        let outer_marked = transaction.depth() == 1 && transaction.innermost_marked();
        let outcome = transaction.pop_level()?;
        if outcome == LevelOutcome::Nested {
            return Ok(());
        }

        let Some(mut active) = state.active.take() else {
            return Ok(());
        };
        let commit_failed = outcome == LevelOutcome::Commit && state.fail_next_commit;
        state.fail_next_commit = false;

        let result = if outcome == LevelOutcome::Commit && !commit_failed {
            active.transaction.commit()?;
            state.stats.commits += 1;
            debug!(
                store = %self.name,
                txn = %active.transaction.id(),
                changes = active.transaction.change_count(),
                elapsed = ?active.transaction.duration(),
                "transaction committed"
            );
            Ok(())
        } else {
            let reverted = active.transaction.change_count();
            let undo = active.transaction.rollback()?;
            for change in undo {
                undo_change(&mut state.tables, change);
            }
            state.stats.rollbacks += 1;
            debug!(
                store = %self.name,
                txn = %active.transaction.id(),
                changes = reverted,
                elapsed = ?active.transaction.duration(),
                "transaction rolled back"
            );

            if commit_failed {
                Err(DaoError::TransactionError(format!(
                    "commit of {} failed, changes rolled back",
                    active.transaction.id()
                )))
            } else if outer_marked {
                // A nested level ended unmarked under a successful outer level.
                Err(DaoError::TransactionError(format!(
                    "{} rolled back: a nested level was not marked successful",
                    active.transaction.id()
                )))
            } else {
                Ok(())
            }
        };

        drop(state);
        self.released.notify_all();
        result
    }

    fn in_transaction(&self) -> bool {
        let me = thread::current().id();
        self.state
            .lock()
            .map(|state| state.active.as_ref().is_some_and(|active| active.owner == me))
            .unwrap_or(false)
    }
}

fn table_ref<'a>(tables: &'a HashMap<String, Table>, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| DaoError::TableNotFound(name.to_string()))
}

fn table_mut<'a>(tables: &'a mut HashMap<String, Table>, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| DaoError::TableNotFound(name.to_string()))
}

fn undo_change(tables: &mut HashMap<String, Table>, change: Change) {
    let Some(table) = tables.get_mut(change.table_name()) else {
        return;
    };
    match change {
        Change::InsertRow { key, .. } => {
            table.delete(key);
        }
        Change::UpdateRow { key, old_row, .. } | Change::DeleteRow { key, old_row, .. } => {
            table.restore(key, old_row);
        }
        Change::ClearTable { rows, .. } => table.restore_all(rows),
    }
}
