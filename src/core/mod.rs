pub mod func;
pub mod message;

pub use func::{FlowContext, FlowFunc, StreamInput};
pub use message::{DataType, FlowMessage, TensorDesc};
