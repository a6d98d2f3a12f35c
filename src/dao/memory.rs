use super::{Dao, MemoryQuery, MemoryQueryBuilder, TableEntity};
use crate::core::{DaoError, Result};
use crate::storage::{MemoryStore, TransactionalStore};
use std::marker::PhantomData;
use std::sync::Arc;

/// [`Dao`] over one table of a [`MemoryStore`]
pub struct MemoryDao<E: TableEntity> {
    store: Arc<MemoryStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: TableEntity> MemoryDao<E> {
    /// Bind to the entity's table, creating it if needed
    pub fn new(store: Arc<MemoryStore>) -> Result<Self> {
        if !store.table_exists(E::table_name())? {
            store.create_table(E::table_name(), E::schema())?;
        }
        Ok(Self {
            store,
            _entity: PhantomData,
        })
    }

    pub fn memory_store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn query_builder(&self) -> MemoryQueryBuilder<E> {
        MemoryQuery::builder(Arc::clone(&self.store))
    }

    fn require_key(entity: &E) -> Result<i64> {
        entity
            .key()
            .ok_or_else(|| DaoError::MissingKey(E::table_name().to_string()))
    }
}

impl<E: TableEntity> Dao for MemoryDao<E> {
    type Entity = E;

    fn store(&self) -> Arc<dyn TransactionalStore> {
        self.store.clone()
    }

    fn insert(&self, entity: &E) -> Result<i64> {
        self.store
            .insert_row(E::table_name(), entity.key(), entity.to_row())
    }

    fn insert_or_replace(&self, entity: &E) -> Result<i64> {
        self.store
            .upsert_row(E::table_name(), entity.key(), entity.to_row())
    }

    fn update(&self, entity: &E) -> Result<()> {
        let key = Self::require_key(entity)?;
        self.store.update_row(E::table_name(), key, entity.to_row())
    }

    fn delete(&self, entity: &E) -> Result<()> {
        let key = Self::require_key(entity)?;
        self.delete_by_key(&key)
    }

    fn delete_by_key(&self, key: &i64) -> Result<()> {
        self.store.delete_row(E::table_name(), *key).map(|_| ())
    }

    fn delete_all(&self) -> Result<()> {
        self.store.clear_table(E::table_name()).map(|_| ())
    }

    fn load(&self, key: &i64) -> Result<Option<E>> {
        self.store
            .get_row(E::table_name(), *key)?
            .map(|row| E::from_row(*key, &row))
            .transpose()
    }

    fn load_all(&self) -> Result<Vec<E>> {
        self.store
            .scan(E::table_name())?
            .iter()
            .map(|(key, row)| E::from_row(*key, row))
            .collect()
    }

    fn count(&self) -> Result<u64> {
        Ok(self.store.row_count(E::table_name())? as u64)
    }

    fn refresh(&self, entity: &E) -> Result<E> {
        let key = Self::require_key(entity)?;
        self.load(&key)?.ok_or_else(|| DaoError::EntityNotFound {
            table: E::table_name().to_string(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Row, Schema, Value};
    use crate::dao::{Entity, Query};

    #[derive(Debug, Clone, PartialEq)]
    struct City {
        id: Option<i64>,
        name: String,
    }

    impl City {
        fn new(name: &str) -> Self {
            Self {
                id: None,
                name: name.to_string(),
            }
        }
    }

    impl Entity for City {
        type Key = i64;
    }

    impl TableEntity for City {
        fn table_name() -> &'static str {
            "cities"
        }

        fn schema() -> Schema {
            Schema::new(vec![Column::new("name", DataType::Text).not_null()])
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn to_row(&self) -> Row {
            vec![Value::Text(self.name.clone())]
        }

        fn from_row(key: i64, row: &Row) -> Result<Self> {
            let name = row
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| DaoError::TypeMismatch("name is not text".into()))?;
            Ok(Self {
                id: Some(key),
                name: name.to_string(),
            })
        }
    }

    fn dao() -> MemoryDao<City> {
        MemoryDao::new(MemoryStore::shared("test")).unwrap()
    }

    #[test]
    fn test_new_reuses_existing_table() {
        let store = MemoryStore::shared("test");
        MemoryDao::<City>::new(Arc::clone(&store)).unwrap();
        assert!(MemoryDao::<City>::new(store).is_ok());
    }

    #[test]
    fn test_crud_roundtrip() {
        let dao = dao();
        let key = dao.insert(&City::new("Oslo")).unwrap();
        let mut city = dao.load(&key).unwrap().unwrap();
        assert_eq!(city.name, "Oslo");

        city.name = "Bergen".into();
        dao.update(&city).unwrap();
        assert_eq!(dao.refresh(&City { id: Some(key), name: String::new() }).unwrap(), city);

        dao.delete(&city).unwrap();
        assert_eq!(dao.count().unwrap(), 0);
        assert!(dao.load(&key).unwrap().is_none());
    }

    #[test]
    fn test_insert_in_tx_rolls_back_on_failure() {
        let dao = dao();
        let cities = vec![
            City { id: Some(1), name: "A".into() },
            City { id: Some(1), name: "duplicate".into() },
        ];
        assert!(matches!(
            dao.insert_in_tx(&cities),
            Err(DaoError::ConstraintViolation(_))
        ));
        assert_eq!(dao.count().unwrap(), 0);
        assert_eq!(dao.memory_store().stats().unwrap().rollbacks, 1);
    }

    #[test]
    fn test_update_without_key_fails() {
        let dao = dao();
        assert_eq!(
            dao.update(&City::new("nowhere")),
            Err(DaoError::MissingKey("cities".into()))
        );
    }

    #[test]
    fn test_query_builder_filters_orders_and_limits() {
        let dao = dao();
        for name in ["Lima", "Lyon", "Kyiv", "Lund"] {
            dao.insert(&City::new(name)).unwrap();
        }

        let query = dao
            .query_builder()
            .filter(|_, row| row[0].as_str().is_some_and(|name| name.starts_with('L')))
            .order_by_key(true)
            .limit(2)
            .build();
        let names: Vec<String> = query.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Lund", "Lyon"]);

        let none = dao.query_builder().filter(|_, _| false).build();
        assert!(none.list().unwrap().is_empty());
        assert_eq!(none.unique().unwrap(), None);
    }
}
