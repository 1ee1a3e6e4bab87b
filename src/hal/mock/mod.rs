pub mod queue_driver;

pub use queue_driver::MemQueueDriver;
