use crate::core::{Result, Row, Schema};
use std::fmt::Debug;

/// A persistent object handled by a DAO
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: Clone + Send + Sync + Debug + 'static;
}

/// Mapping between an entity and one table of a `MemoryStore`
///
/// `key()` is `None` for entities that were never stored; the store assigns
/// the next free key on insert.
pub trait TableEntity: Entity<Key = i64> {
    fn table_name() -> &'static str;

    fn schema() -> Schema;

    fn key(&self) -> Option<i64>;

    fn to_row(&self) -> Row;

    fn from_row(key: i64, row: &Row) -> Result<Self>;
}
