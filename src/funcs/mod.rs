//! Functions shipped with the engine, registered through
//! `#[derive(FlowFunc)]` and available from `FuncRegistry::with_builtins`.

pub mod counter_source;
pub mod identity;
pub mod sink;

pub use counter_source::CounterSource;
pub use identity::Identity;
pub use sink::Sink;
