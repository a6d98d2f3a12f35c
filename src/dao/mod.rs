pub mod dao;
pub mod entity;
pub mod erased;
pub mod memory;
pub mod query;

pub use dao::{Dao, KeyOf};
pub use entity::{Entity, TableEntity};
pub use erased::{any_value, downcast, AnyValue};
pub(crate) use erased::{ErasedDao, ErasedQuery};
pub use memory::MemoryDao;
pub use query::{MemoryQuery, MemoryQueryBuilder, Query};
