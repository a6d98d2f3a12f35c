use super::Entity;
use crate::core::Result;
use crate::storage::{run_in_transaction, TransactionalStore};
use std::sync::Arc;

/// Key type of the entity handled by a DAO
pub type KeyOf<D> = <<D as Dao>::Entity as Entity>::Key;

/// Data access object for one entity type
///
/// The batch operations default to running the single-entity operation for
/// every element inside one transaction of [`Dao::store`].
pub trait Dao: Send + Sync + 'static {
    type Entity: Entity;

    /// The store this DAO writes to
    fn store(&self) -> Arc<dyn TransactionalStore>;

    fn insert(&self, entity: &Self::Entity) -> Result<KeyOf<Self>>;

    fn insert_or_replace(&self, entity: &Self::Entity) -> Result<KeyOf<Self>>;

    fn update(&self, entity: &Self::Entity) -> Result<()>;

    fn delete(&self, entity: &Self::Entity) -> Result<()>;

    fn delete_by_key(&self, key: &KeyOf<Self>) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    fn load(&self, key: &KeyOf<Self>) -> Result<Option<Self::Entity>>;

    fn load_all(&self) -> Result<Vec<Self::Entity>>;

    fn count(&self) -> Result<u64>;

    /// Reload the stored image of `entity`
    fn refresh(&self, entity: &Self::Entity) -> Result<Self::Entity>;

    fn insert_in_tx(&self, entities: &[Self::Entity]) -> Result<()> {
        let store = self.store();
        run_in_transaction(store.as_ref(), || {
            entities.iter().try_for_each(|e| self.insert(e).map(|_| ()))
        })
    }

    fn insert_or_replace_in_tx(&self, entities: &[Self::Entity]) -> Result<()> {
        let store = self.store();
        run_in_transaction(store.as_ref(), || {
            entities
                .iter()
                .try_for_each(|e| self.insert_or_replace(e).map(|_| ()))
        })
    }

    fn update_in_tx(&self, entities: &[Self::Entity]) -> Result<()> {
        let store = self.store();
        run_in_transaction(store.as_ref(), || {
            entities.iter().try_for_each(|e| self.update(e))
        })
    }

    fn delete_in_tx(&self, entities: &[Self::Entity]) -> Result<()> {
        let store = self.store();
        run_in_transaction(store.as_ref(), || {
            entities.iter().try_for_each(|e| self.delete(e))
        })
    }
}
