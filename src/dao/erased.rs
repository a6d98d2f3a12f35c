//! Type-erased views of DAOs and queries.
//!
//! Operation descriptors travel through one queue regardless of entity type,
//! so the worker talks to collaborators through these object-safe traits and
//! payloads/results move as [`AnyValue`]. The typed facade downcasts results
//! back to the caller's types.

use super::{Dao, KeyOf, Query};
use crate::core::{DaoError, Result};
use crate::storage::TransactionalStore;
use std::any::{Any, type_name};
use std::sync::Arc;

/// Shared, type-erased payload or result value
pub type AnyValue = Arc<dyn Any + Send + Sync>;

pub fn any_value<T: Any + Send + Sync>(value: T) -> AnyValue {
    Arc::new(value)
}

/// Borrow the concrete value behind an [`AnyValue`]
pub fn downcast<T: Any>(value: &AnyValue) -> Result<&T> {
    value.downcast_ref::<T>().ok_or_else(|| {
        DaoError::TypeMismatch(format!("value is not a {}", type_name::<T>()))
    })
}

pub(crate) trait ErasedDao: Send + Sync {
    fn entity_name(&self) -> &'static str;
    fn target_store(&self) -> Arc<dyn TransactionalStore>;

    fn insert_any(&self, entity: &AnyValue) -> Result<AnyValue>;
    fn insert_or_replace_any(&self, entity: &AnyValue) -> Result<AnyValue>;
    fn update_any(&self, entity: &AnyValue) -> Result<()>;
    fn delete_any(&self, entity: &AnyValue) -> Result<()>;
    fn delete_by_key_any(&self, key: &AnyValue) -> Result<()>;
    fn delete_all_any(&self) -> Result<()>;

    fn insert_in_tx_any(&self, entities: &AnyValue) -> Result<()>;
    fn insert_or_replace_in_tx_any(&self, entities: &AnyValue) -> Result<()>;
    fn update_in_tx_any(&self, entities: &AnyValue) -> Result<()>;
    fn delete_in_tx_any(&self, entities: &AnyValue) -> Result<()>;

    fn load_any(&self, key: &AnyValue) -> Result<Option<AnyValue>>;
    fn load_all_any(&self) -> Result<AnyValue>;
    fn count_any(&self) -> Result<AnyValue>;
    fn refresh_any(&self, entity: &AnyValue) -> Result<AnyValue>;
}

impl<D: Dao> ErasedDao for D {
    fn entity_name(&self) -> &'static str {
        type_name::<D::Entity>()
    }

    fn target_store(&self) -> Arc<dyn TransactionalStore> {
        self.store()
    }

    fn insert_any(&self, entity: &AnyValue) -> Result<AnyValue> {
        let key = self.insert(downcast::<D::Entity>(entity)?)?;
        Ok(any_value(key))
    }

    fn insert_or_replace_any(&self, entity: &AnyValue) -> Result<AnyValue> {
        let key = self.insert_or_replace(downcast::<D::Entity>(entity)?)?;
        Ok(any_value(key))
    }

    fn update_any(&self, entity: &AnyValue) -> Result<()> {
        self.update(downcast::<D::Entity>(entity)?)
    }

    fn delete_any(&self, entity: &AnyValue) -> Result<()> {
        self.delete(downcast::<D::Entity>(entity)?)
    }

    fn delete_by_key_any(&self, key: &AnyValue) -> Result<()> {
        self.delete_by_key(downcast::<KeyOf<D>>(key)?)
    }

    fn delete_all_any(&self) -> Result<()> {
        self.delete_all()
    }

    fn insert_in_tx_any(&self, entities: &AnyValue) -> Result<()> {
        self.insert_in_tx(downcast::<Vec<D::Entity>>(entities)?)
    }

    fn insert_or_replace_in_tx_any(&self, entities: &AnyValue) -> Result<()> {
        self.insert_or_replace_in_tx(downcast::<Vec<D::Entity>>(entities)?)
    }

    fn update_in_tx_any(&self, entities: &AnyValue) -> Result<()> {
        self.update_in_tx(downcast::<Vec<D::Entity>>(entities)?)
    }

    fn delete_in_tx_any(&self, entities: &AnyValue) -> Result<()> {
        self.delete_in_tx(downcast::<Vec<D::Entity>>(entities)?)
    }

    fn load_any(&self, key: &AnyValue) -> Result<Option<AnyValue>> {
        Ok(self
            .load(downcast::<KeyOf<D>>(key)?)?
            .map(any_value))
    }

    fn load_all_any(&self) -> Result<AnyValue> {
        Ok(any_value(self.load_all()?))
    }

    fn count_any(&self) -> Result<AnyValue> {
        Ok(any_value(self.count()?))
    }

    fn refresh_any(&self, entity: &AnyValue) -> Result<AnyValue> {
        Ok(any_value(self.refresh(downcast::<D::Entity>(entity)?)?))
    }
}

pub(crate) trait ErasedQuery: Send + Sync {
    fn list_any(&self) -> Result<AnyValue>;
    fn unique_any(&self) -> Result<Option<AnyValue>>;
}

impl<Q: Query> ErasedQuery for Q {
    fn list_any(&self) -> Result<AnyValue> {
        Ok(any_value(self.list()?))
    }

    fn unique_any(&self) -> Result<Option<AnyValue>> {
        Ok(self.unique()?.map(any_value::<Q::Entity>))
    }
}
