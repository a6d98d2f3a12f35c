use super::{Entity, TableEntity};
use crate::core::{DaoError, Result, Row};
use crate::storage::{MemoryStore, TransactionalStore};
use std::sync::Arc;

/// A prepared query producing entities
pub trait Query: Send + Sync + 'static {
    type Entity: Entity;

    /// The store the query reads from
    fn store(&self) -> Arc<dyn TransactionalStore>;

    fn list(&self) -> Result<Vec<Self::Entity>>;

    /// At most one match; more than one is `NonUniqueResult`
    fn unique(&self) -> Result<Option<Self::Entity>>;
}

type RowFilter = Arc<dyn Fn(i64, &Row) -> bool + Send + Sync>;

/// Table scan with an optional row predicate, ordering and limit
pub struct MemoryQuery<E: TableEntity> {
    store: Arc<MemoryStore>,
    filter: Option<RowFilter>,
    descending: bool,
    limit: Option<usize>,
    _entity: std::marker::PhantomData<fn() -> E>,
}

impl<E: TableEntity> MemoryQuery<E> {
    pub fn builder(store: Arc<MemoryStore>) -> MemoryQueryBuilder<E> {
        MemoryQueryBuilder {
            query: MemoryQuery {
                store,
                filter: None,
                descending: false,
                limit: None,
                _entity: std::marker::PhantomData,
            },
        }
    }

    fn matching_rows(&self) -> Result<Vec<(i64, Row)>> {
        let mut rows = self.store.scan(E::table_name())?;
        if let Some(filter) = &self.filter {
            rows.retain(|(key, row)| filter(*key, row));
        }
        if self.descending {
            rows.reverse();
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

impl<E: TableEntity> Query for MemoryQuery<E> {
    type Entity = E;

    fn store(&self) -> Arc<dyn TransactionalStore> {
        self.store.clone()
    }

    fn list(&self) -> Result<Vec<E>> {
        self.matching_rows()?
            .iter()
            .map(|(key, row)| E::from_row(*key, row))
            .collect()
    }

    fn unique(&self) -> Result<Option<E>> {
        let rows = self.matching_rows()?;
        match rows.as_slice() {
            [] => Ok(None),
            [(key, row)] => E::from_row(*key, row).map(Some),
            _ => Err(DaoError::NonUniqueResult(rows.len())),
        }
    }
}

/// Builder for [`MemoryQuery`]
pub struct MemoryQueryBuilder<E: TableEntity> {
    query: MemoryQuery<E>,
}

impl<E: TableEntity> MemoryQueryBuilder<E> {
    /// Keep only rows for which `predicate` holds
    pub fn filter(mut self, predicate: impl Fn(i64, &Row) -> bool + Send + Sync + 'static) -> Self {
        self.query.filter = Some(Arc::new(predicate));
        self
    }

    /// Order by key; ascending unless `descending`
    pub fn order_by_key(mut self, descending: bool) -> Self {
        self.query.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn build(self) -> MemoryQuery<E> {
        self.query
    }
}
