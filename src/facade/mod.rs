pub mod async_session;
pub mod dao_session;

pub use async_session::{AsyncSession, AsyncSessionBuilder};
pub use dao_session::DaoSession;
