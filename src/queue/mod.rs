pub mod channel;
pub mod output;
pub mod writer;

pub use channel::{open_channel, NativeQueue, ProxyQueue, QueueChannel};
pub use output::{OutputPort, OutputPortTable, PublishOutcome};
pub use writer::MbufWriter;
