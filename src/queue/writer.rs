use std::sync::Arc;
use tracing::debug;

use super::QueueChannel;
use crate::buffers::Mbuf;
use crate::error::FlowError;
use crate::hal::{QueueBinding, Rejected};

/// Output side of one queue channel.
pub struct MbufWriter {
    channel: Arc<dyn QueueChannel>,
}

impl MbufWriter {
    pub fn new(channel: Arc<dyn QueueChannel>) -> Self {
        Self { channel }
    }

    pub fn binding(&self) -> &QueueBinding {
        self.channel.binding()
    }

    /// Writes one buffer. A full queue is reported as `QueueFull` with the
    /// buffer handed back so the caller can keep it for a later retry.
    pub fn write(&self, mbuf: Mbuf) -> Result<(), Rejected> {
        self.channel.enqueue(mbuf).map_err(|rejected| {
            if rejected.error == FlowError::QueueFull {
                debug!(queue = %self.binding(), "output queue full");
            }
            rejected
        })
    }

    pub fn channel(&self) -> &Arc<dyn QueueChannel> {
        &self.channel
    }
}
