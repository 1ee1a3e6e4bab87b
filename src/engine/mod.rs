pub mod exception;
pub mod guard;
pub mod model;
pub mod output;
pub mod processor;
pub mod reader;
pub mod scheduler;
pub mod signals;
pub mod state;

pub use exception::{ExceptionRecord, ExceptionSet};
pub use guard::{ScheduleGuard, ScheduleToken};
pub use model::FlowModel;
pub use output::{ProcessorOutputs, Transaction};
pub use processor::{ExceptionReporter, FlowFuncProcessor};
pub use reader::{MbufReader, ReadStatus};
pub use scheduler::{ProcessorScheduler, SchedulerConfig};
pub use signals::RuntimeSignals;
pub use state::ProcessorState;
