use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::{open_channel, MbufWriter};
use crate::buffers::Mbuf;
use crate::error::{FlowError, FlowResult};
use crate::hal::{QueueBinding, QueueDriver};

/// What happened to a published buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Written,
    /// Parked in the replay cache behind earlier backpressured buffers
    Cached,
}

/// One physical output queue, shared by every processor writing to it.
///
/// The replay cache mutex serializes writes and cache mutation, so buffers
/// reach the queue in publish order even when several processors target the
/// same binding.
pub struct OutputPort {
    writer: MbufWriter,
    replay: Mutex<VecDeque<Mbuf>>,
}

impl OutputPort {
    pub fn new(writer: MbufWriter) -> Self {
        Self {
            writer,
            replay: Mutex::new(VecDeque::new()),
        }
    }

    pub fn binding(&self) -> &QueueBinding {
        self.writer.binding()
    }

    /// Writes `mbuf` after every earlier cached buffer; caches it on
    /// backpressure. Driver faults drop the buffer and are returned.
    pub fn publish(&self, mbuf: Mbuf) -> FlowResult<PublishOutcome> {
        let mut replay = self.replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !Self::drain(&self.writer, &mut replay)? {
            replay.push_back(mbuf);
            return Ok(PublishOutcome::Cached);
        }

        match self.writer.write(mbuf) {
            Ok(()) => Ok(PublishOutcome::Written),
            Err(rejected) if rejected.error == FlowError::QueueFull => {
                replay.push_back(rejected.into_mbuf());
                debug!(queue = %self.binding(), cached = replay.len(), "output cached for replay");
                Ok(PublishOutcome::Cached)
            }
            Err(rejected) => {
                warn!(queue = %self.binding(), error = %rejected.error, "output write failed");
                Err(rejected.error)
            }
        }
    }

    /// Replays cached buffers front to back. `Ok(true)` once the cache is empty.
    pub fn flush(&self) -> FlowResult<bool> {
        let mut replay = self.replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::drain(&self.writer, &mut replay)
    }

    fn drain(writer: &MbufWriter, replay: &mut VecDeque<Mbuf>) -> FlowResult<bool> {
        while let Some(front) = replay.pop_front() {
            match writer.write(front) {
                Ok(()) => {}
                Err(rejected) if rejected.error == FlowError::QueueFull => {
                    replay.push_front(rejected.into_mbuf());
                    return Ok(false);
                }
                Err(rejected) => {
                    warn!(queue = %writer.binding(), error = %rejected.error, "replay write failed");
                    return Err(rejected.error);
                }
            }
        }
        Ok(true)
    }

    pub fn replay_len(&self) -> usize {
        self.replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Output ports keyed by physical queue, owned by the orchestration layer
/// and shared between processors.
pub struct OutputPortTable {
    driver: Arc<dyn QueueDriver>,
    ports: Mutex<HashMap<(u32, u32), Arc<OutputPort>>>,
}

impl OutputPortTable {
    pub fn new(driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            driver,
            ports: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_open(&self, binding: QueueBinding) -> Arc<OutputPort> {
        let mut ports = self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ports
            .entry(binding.physical())
            .or_insert_with(|| {
                let channel = open_channel(binding, self.driver.clone());
                Arc::new(OutputPort::new(MbufWriter::new(channel)))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
