use serde::{Deserialize, Serialize};
use std::fmt;

use crate::buffers::Mbuf;
use crate::error::FlowError;

/// Static description of one hardware queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueBinding {
    pub device_id: u32,
    pub queue_id: u32,
    /// Accessed through explicit copies instead of zero-copy hand-off
    #[serde(default)]
    pub is_proxy: bool,
}

impl QueueBinding {
    pub fn native(device_id: u32, queue_id: u32) -> Self {
        Self {
            device_id,
            queue_id,
            is_proxy: false,
        }
    }

    pub fn proxy(device_id: u32, queue_id: u32) -> Self {
        Self {
            device_id,
            queue_id,
            is_proxy: true,
        }
    }

    /// Identity of the physical queue, regardless of access kind.
    pub fn physical(&self) -> (u32, u32) {
        (self.device_id, self.queue_id)
    }
}

impl fmt::Display for QueueBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_proxy { "proxy" } else { "native" };
        write!(f, "dev{}:q{}({})", self.device_id, self.queue_id, kind)
    }
}

/// Event kinds a queue can publish to a subscribed group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
    NotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    NotEmpty(QueueBinding),
}

/// A buffer the driver refused, handed back to its owner.
#[derive(Debug)]
pub struct Rejected {
    pub error: FlowError,
    pub mbuf: Mbuf,
}

impl Rejected {
    pub fn new(error: FlowError, mbuf: Mbuf) -> Self {
        Self { error, mbuf }
    }

    pub fn into_mbuf(self) -> Mbuf {
        self.mbuf
    }
}
