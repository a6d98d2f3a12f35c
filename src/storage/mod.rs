pub mod memory;
pub mod store;
pub mod table;

pub use memory::{MemoryStore, StoreStats};
pub use store::{run_in_transaction, same_store, TransactionScope, TransactionalStore};
pub use table::Table;
