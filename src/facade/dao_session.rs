use super::{AsyncSession, AsyncSessionBuilder};
use crate::core::{DaoError, Result};
use crate::dao::{Dao, Entity, ErasedDao};
use crate::storage::TransactionalStore;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct RegisteredDao {
    erased: Arc<dyn ErasedDao>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Registry of DAOs sharing one store, keyed by entity type
pub struct DaoSession {
    store: Arc<dyn TransactionalStore>,
    daos: HashMap<TypeId, RegisteredDao>,
}

impl DaoSession {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self {
            store,
            daos: HashMap::new(),
        }
    }

    /// Register the DAO for `D::Entity`; one DAO per entity type
    pub fn register<D: Dao>(&mut self, dao: D) -> Result<()> {
        let entity = TypeId::of::<D::Entity>();
        if self.daos.contains_key(&entity) {
            return Err(DaoError::ProtocolMisuse(format!(
                "a DAO for '{}' is already registered",
                type_name::<D::Entity>()
            )));
        }

        let dao = Arc::new(dao);
        self.daos.insert(
            entity,
            RegisteredDao {
                erased: dao.clone(),
                typed: dao,
            },
        );
        Ok(())
    }

    pub fn with_dao<D: Dao>(mut self, dao: D) -> Result<Self> {
        self.register(dao)?;
        Ok(self)
    }

    /// The registered DAO of type `D`
    pub fn dao<D: Dao>(&self) -> Result<Arc<D>> {
        let registered = self.registered::<D::Entity>()?;
        Arc::clone(&registered.typed).downcast::<D>().map_err(|_| {
            DaoError::TypeMismatch(format!(
                "DAO registered for '{}' is not a {}",
                type_name::<D::Entity>(),
                type_name::<D>()
            ))
        })
    }

    pub fn is_registered<E: Entity>(&self) -> bool {
        self.daos.contains_key(&TypeId::of::<E>())
    }

    pub fn store(&self) -> &Arc<dyn TransactionalStore> {
        &self.store
    }

    pub(crate) fn erased_dao<E: Entity>(&self) -> Result<Arc<dyn ErasedDao>> {
        Ok(Arc::clone(&self.registered::<E>()?.erased))
    }

    /// Asynchronous session with default settings over this registry
    pub fn start_async_session(self: &Arc<Self>) -> Result<AsyncSession> {
        self.async_session_builder().build()
    }

    pub fn async_session_builder(self: &Arc<Self>) -> AsyncSessionBuilder {
        AsyncSession::builder(Arc::clone(self))
    }

    fn registered<E: Entity>(&self) -> Result<&RegisteredDao> {
        self.daos
            .get(&TypeId::of::<E>())
            .ok_or_else(|| DaoError::DaoNotRegistered(type_name::<E>().to_string()))
    }
}

impl fmt::Debug for DaoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entities: Vec<&str> = self
            .daos
            .values()
            .map(|registered| registered.erased.entity_name())
            .collect();
        entities.sort_unstable();
        f.debug_struct("DaoSession")
            .field("entities", &entities)
            .finish()
    }
}
