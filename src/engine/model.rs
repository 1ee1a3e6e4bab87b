use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::exception::ExceptionSet;
use super::signals::RuntimeSignals;
use crate::align::{AlignedSet, DataAligner};
use crate::buffers::Mbuf;
use crate::config::ModelConfig;
use crate::core::FlowMessage;
use crate::error::{FlowError, FlowResult};
use crate::hal::QueueDriver;
use crate::queue::{open_channel, QueueChannel};

/// Sleep between polls of channels that cannot raise queue events.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Synchronous request/response call into another sub-graph.
///
/// `run` feeds every input queue, then blocks until one output set is
/// available, the timeout elapses, the runtime starts shutting down, or the
/// caller's transaction is put under exception.
pub struct FlowModel {
    name: String,
    inputs: Vec<Arc<dyn QueueChannel>>,
    outputs: Vec<Arc<dyn QueueChannel>>,
    aligner: Option<DataAligner>,
    driver: Arc<dyn QueueDriver>,
    signals: Arc<RuntimeSignals>,
    exceptions: Arc<ExceptionSet>,
    group_id: u32,
    wait_slice: Duration,
    run_lock: Mutex<()>,
}

impl FlowModel {
    pub fn new(
        config: &ModelConfig,
        driver: Arc<dyn QueueDriver>,
        signals: Arc<RuntimeSignals>,
        exceptions: Arc<ExceptionSet>,
    ) -> Self {
        let inputs = config.inputs
            .iter()
            .map(|binding| open_channel(*binding, driver.clone()))
            .collect();
        let outputs: Vec<Arc<dyn QueueChannel>> = config.outputs
            .iter()
            .map(|binding| open_channel(*binding, driver.clone()))
            .collect();
        let aligner = config.align
            .clone()
            .map(|align| DataAligner::new(outputs.len(), align));

        Self {
            name: config.name.clone(),
            inputs,
            outputs,
            aligner,
            driver,
            signals,
            exceptions,
            group_id: config.group_id,
            wait_slice: Duration::from_millis(config.wait_slice_ms.max(1)),
            run_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_num(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_num(&self) -> usize {
        self.outputs.len()
    }

    /// Feeds `inputs` in order and waits for one output per output queue.
    /// Slots missing from a best-effort aligned set come back as null-data
    /// messages carrying `TimeOut`.
    pub fn run(&self, inputs: Vec<FlowMessage>, timeout: Option<Duration>) -> FlowResult<Vec<FlowMessage>> {
        let _serial = self.run_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if inputs.len() != self.inputs.len() {
            warn!(model = %self.name, expected = self.inputs.len(), got = inputs.len(), "input count mismatch");
            return Err(FlowError::ParamInvalid);
        }

        let trans_id = inputs
            .first()
            .map(|msg| msg.transaction_id())
            .filter(|&id| id != 0);

        for (index, (channel, msg)) in self.inputs.iter().zip(inputs).enumerate() {
            if let Err(rejected) = channel.enqueue(msg.into_mbuf()) {
                warn!(model = %self.name, index, error = %rejected.error, "feeding model input failed");
                return Err(rejected.error);
            }
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let set = match &self.aligner {
            Some(aligner) => self.collect_aligned(aligner, trans_id, deadline)?,
            None => {
                let mut set = Vec::with_capacity(self.outputs.len());
                for index in 0..self.outputs.len() {
                    set.push(Some(self.wait_dequeue(index, trans_id, deadline)?));
                }
                set
            }
        };

        set.into_iter()
            .map(|slot| match slot {
                Some(mbuf) => FlowMessage::from_mbuf(mbuf),
                None => FlowMessage::empty(self.driver.pool(), FlowError::TimeOut.code()),
            })
            .collect()
    }

    fn collect_aligned(
        &self,
        aligner: &DataAligner,
        trans_id: Option<u64>,
        deadline: Option<Instant>,
    ) -> FlowResult<AlignedSet> {
        loop {
            if let Some(set) = aligner.try_take_expired_or_over_limit() {
                if let Some(set) = self.accept_set(set, trans_id) {
                    return Ok(set);
                }
                continue;
            }
            let index = aligner.select_next_index();
            // with keys pending, wake up each slice so expired keys get released
            let wait_until = match (deadline, aligner.pending_len() > 0) {
                (Some(deadline), true) => Some(deadline.min(Instant::now() + self.wait_slice)),
                (None, true) => Some(Instant::now() + self.wait_slice),
                (deadline, false) => deadline,
            };
            match self.wait_dequeue(index, trans_id, wait_until) {
                Ok(mbuf) => {
                    if let Some(set) = aligner.push_and_align(index, mbuf)? {
                        if let Some(set) = self.accept_set(set, trans_id) {
                            return Ok(set);
                        }
                    }
                }
                Err(FlowError::TimeOut) if deadline.map_or(true, |deadline| Instant::now() < deadline) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Releases a set that belongs to another transaction, such as late
    /// output of an earlier call that timed out.
    fn accept_set(&self, set: AlignedSet, trans_id: Option<u64>) -> Option<AlignedSet> {
        let Some(expected) = trans_id else {
            return Some(set);
        };
        let found = set
            .iter()
            .flatten()
            .next()
            .map(|mbuf| mbuf.transaction_id());
        match found {
            Some(found) if found != expected => {
                debug!(model = %self.name, expected, found, "dropping output set of another transaction");
                None
            }
            _ => Some(set),
        }
    }

    fn wait_dequeue(&self, index: usize, trans_id: Option<u64>, deadline: Option<Instant>) -> FlowResult<Mbuf> {
        let channel = &self.outputs[index];
        let subscribed = !channel.needs_retry() && channel.subscribe_not_empty(self.group_id).is_ok();

        let result = self.wait_loop(channel.as_ref(), subscribed, trans_id, deadline);

        if subscribed {
            if let Err(e) = channel.unsubscribe_not_empty() {
                warn!(model = %self.name, queue = %channel.binding(), error = %e, "unsubscribing model output failed");
            }
        }
        result
    }

    fn wait_loop(
        &self,
        channel: &dyn QueueChannel,
        subscribed: bool,
        trans_id: Option<u64>,
        deadline: Option<Instant>,
    ) -> FlowResult<Mbuf> {
        let _waiting = self.signals.swap_to_waiting();
        let started = Instant::now();

        loop {
            match channel.dequeue() {
                Ok(mbuf) => return Ok(mbuf),
                Err(FlowError::QueueEmpty) => {}
                Err(e) => return Err(e),
            }

            self.signals.check()?;
            if let Some(code) = trans_id.and_then(|id| self.exceptions.code(id)) {
                warn!(model = %self.name, trans_id = ?trans_id, code, "transaction excepted while waiting");
                return Err(FlowError::from_code(code).unwrap_or(FlowError::Failed(code)));
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(model = %self.name, queue = %channel.binding(), waited_ms = started.elapsed().as_millis() as u64, "model wait timed out");
                        return Err(FlowError::TimeOut);
                    }
                    (deadline - now).min(self.wait_slice)
                }
                None => self.wait_slice,
            };

            if subscribed {
                match self.driver.wait_event(self.group_id, 0, slice) {
                    Ok(_) | Err(FlowError::TimeOut) => {}
                    Err(e) => return Err(e),
                }
            } else {
                std::thread::sleep(slice.min(POLL_INTERVAL));
            }
        }
    }
}
