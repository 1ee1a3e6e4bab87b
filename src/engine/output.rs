use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::buffers::MbufPool;
use crate::core::FlowMessage;
use crate::error::{FlowError, FlowResult};
use crate::observability::ProcessorMetrics;
use crate::queue::{OutputPort, PublishOutcome};

/// Transaction a processor is currently working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub trans_id: u64,
    pub stream_label: u32,
}

/// Output indices of one processor, mapped onto shared output ports.
pub struct ProcessorOutputs {
    processor: String,
    ports: Vec<Arc<OutputPort>>,
    usable: Vec<bool>,
    next_trans: Vec<AtomicU64>,
    metrics: Arc<ProcessorMetrics>,
}

impl ProcessorOutputs {
    pub fn new(
        processor: impl Into<String>,
        ports: Vec<Arc<OutputPort>>,
        usable: &[usize],
        metrics: Arc<ProcessorMetrics>,
    ) -> Self {
        let mut usable_mask = vec![false; ports.len()];
        for &index in usable {
            if let Some(slot) = usable_mask.get_mut(index) {
                *slot = true;
            }
        }
        let next_trans = ports.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            processor: processor.into(),
            ports,
            usable: usable_mask,
            next_trans,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn is_usable(&self, index: usize) -> bool {
        self.usable.get(index).copied().unwrap_or(false)
    }

    pub fn usable_indices(&self) -> Vec<usize> {
        (0..self.ports.len()).filter(|&i| self.usable[i]).collect()
    }

    pub fn port(&self, index: usize) -> Option<&Arc<OutputPort>> {
        self.ports.get(index)
    }

    /// Stamps `msg` with a transaction id if it has none and publishes it.
    ///
    /// The id comes from `transaction` when the processor consumes aligned
    /// input, and from a per-output counter in streaming mode or when there
    /// is no current transaction.
    pub fn set_output(
        &self,
        index: usize,
        msg: FlowMessage,
        transaction: Option<Transaction>,
        streaming: bool,
    ) -> FlowResult<PublishOutcome> {
        if !self.is_usable(index) {
            warn!(processor = %self.processor, index, "output index is not usable");
            return Err(FlowError::ParamInvalid);
        }

        if msg.transaction_id() == 0 {
            match transaction {
                Some(current) if !streaming => {
                    msg.set_transaction_id(current.trans_id);
                    msg.set_stream_label(current.stream_label);
                }
                _ => {
                    let trans_id = self.next_trans[index].fetch_add(1, Ordering::SeqCst) + 1;
                    msg.set_transaction_id(trans_id);
                }
            }
        }

        let outcome = self.ports[index].publish(msg.into_mbuf())?;
        if outcome == PublishOutcome::Cached {
            self.metrics.record_replay();
        }
        Ok(outcome)
    }

    /// Publishes a payload-less status message.
    pub fn write_status(
        &self,
        pool: &MbufPool,
        index: usize,
        ret_code: i32,
        transaction: Option<Transaction>,
    ) -> FlowResult<PublishOutcome> {
        let msg = FlowMessage::empty(pool, ret_code)?;
        self.set_output(index, msg, transaction, false)
    }

    /// Replays every cached output. `Ok(true)` once all caches are empty.
    pub fn flush_all(&self) -> FlowResult<bool> {
        let mut drained = true;
        for port in &self.ports {
            drained &= port.flush()?;
        }
        Ok(drained)
    }

    pub fn replay_len(&self, index: usize) -> usize {
        self.ports.get(index).map(|port| port.replay_len()).unwrap_or(0)
    }
}
