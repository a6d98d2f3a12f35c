pub mod flags;
pub mod handle;
pub mod kind;
pub mod operation;

pub use flags::OperationFlags;
pub use handle::OperationHandle;
pub use kind::OperationType;
pub(crate) use kind::{Payload, Target};
pub use operation::AsyncOperation;
