pub mod collector;
pub mod logging;
pub mod metrics;
pub mod monitor;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use logging::init_tracing;
pub use metrics::ProcessorMetrics;
pub use monitor::ProcessorMonitor;
