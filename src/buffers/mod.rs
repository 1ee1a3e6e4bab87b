pub mod head;
pub mod mbuf;
pub mod pool;

pub use head::MbufHeadMsg;
pub use mbuf::Mbuf;
pub use pool::MbufPool;
