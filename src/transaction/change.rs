// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Undo log entries for the reference store. Writes inside a transaction are
// applied to the tables immediately; each one records a Change describing
// how to reverse it. COMMIT discards the log, ROLLBACK replays it backwards.
//
// ============================================================================

use crate::core::Row;
use std::collections::BTreeMap;

/// A single reversible write made inside a transaction
#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted under `key`
    InsertRow { table: String, key: i64 },

    /// A row was overwritten; `old_row` is the previous image
    UpdateRow {
        table: String,
        key: i64,
        old_row: Row,
    },

    /// A row was removed; `old_row` is the removed image
    DeleteRow {
        table: String,
        key: i64,
        old_row: Row,
    },

    /// Every row of a table was removed at once
    ClearTable {
        table: String,
        rows: BTreeMap<i64, Row>,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
            Change::ClearTable { table, .. } => table,
        }
    }

    /// Number of rows this change touched
    pub fn affected_rows(&self) -> usize {
        match self {
            Change::ClearTable { rows, .. } => rows.len(),
            _ => 1,
        }
    }
}
