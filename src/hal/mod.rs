pub mod mock;
pub mod traits;
pub mod types;

pub use mock::MemQueueDriver;
pub use traits::QueueDriver;
pub use types::{QueueBinding, QueueEvent, QueueEventKind, Rejected};
