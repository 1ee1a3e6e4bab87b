pub mod align;
pub mod buffers;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod funcs;
pub mod hal;
pub mod observability;
pub mod queue;
pub mod registry;

pub use error::{FlowError, FlowResult};
