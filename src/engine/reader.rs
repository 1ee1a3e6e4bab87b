use std::sync::Arc;
use tracing::{debug, error};

use crate::align::{AlignedSet, DataAligner};
use crate::buffers::Mbuf;
use crate::error::{FlowError, FlowResult};
use crate::queue::QueueChannel;

/// Result of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete set was reported
    Ready,
    /// Channel `index` is empty. `needs_poll` is set when that channel
    /// cannot raise a queue event, so the caller has to come back on its own.
    NotReady { index: usize, needs_poll: bool },
    /// Buffers were consumed but no set completed within this call
    Partial,
}

/// Produces one complete input set per successful call, either by filling
/// one slot per channel or through a [`DataAligner`].
///
/// A driver failure is sticky: the reader refuses further reads until it is
/// rebuilt.
pub struct MbufReader {
    channels: Vec<Arc<dyn QueueChannel>>,
    aligner: Option<Arc<DataAligner>>,
    slots: Vec<Option<Mbuf>>,
    failed: Option<FlowError>,
}

impl MbufReader {
    pub fn new(channels: Vec<Arc<dyn QueueChannel>>, aligner: Option<Arc<DataAligner>>) -> Self {
        let slots = channels.iter().map(|_| None).collect();
        Self {
            channels,
            aligner,
            slots,
            failed: None,
        }
    }

    pub fn input_num(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Arc<dyn QueueChannel>] {
        &self.channels
    }

    pub fn aligner(&self) -> Option<&Arc<DataAligner>> {
        self.aligner.as_ref()
    }

    pub fn failure(&self) -> Option<FlowError> {
        self.failed
    }

    /// Attempts to assemble one input set and hands it to `report`.
    pub fn read<F>(&mut self, report: F) -> FlowResult<ReadStatus>
    where
        F: FnOnce(AlignedSet),
    {
        if let Some(e) = self.failed {
            return Err(e);
        }
        match self.aligner.clone() {
            Some(aligner) => self.read_aligned(&aligner, report),
            None => self.read_slots(report),
        }
    }

    fn read_slots<F>(&mut self, report: F) -> FlowResult<ReadStatus>
    where
        F: FnOnce(AlignedSet),
    {
        let mut first_empty = None;
        for index in 0..self.channels.len() {
            if self.slots[index].is_some() {
                continue;
            }
            match self.channels[index].dequeue() {
                Ok(mbuf) => self.slots[index] = Some(mbuf),
                Err(FlowError::QueueEmpty) => {
                    first_empty.get_or_insert(index);
                }
                Err(e) => return Err(self.fail(index, e)),
            }
        }

        if let Some(index) = first_empty {
            return Ok(ReadStatus::NotReady {
                index,
                needs_poll: self.channels[index].needs_retry(),
            });
        }

        let set = std::mem::replace(&mut self.slots, self.channels.iter().map(|_| None).collect());
        report(set);
        Ok(ReadStatus::Ready)
    }

    fn read_aligned<F>(&mut self, aligner: &DataAligner, report: F) -> FlowResult<ReadStatus>
    where
        F: FnOnce(AlignedSet),
    {
        if let Some(set) = aligner.try_take_expired_or_over_limit() {
            report(set);
            return Ok(ReadStatus::Ready);
        }

        let mut tried = vec![false; self.channels.len()];
        let mut first_empty = None;
        let mut consumed = false;

        // one pass: at most one attempt per channel
        for _ in 0..self.channels.len() {
            let Some(index) = aligner
                .index_order()
                .into_iter()
                .find(|&index| !tried[index])
            else {
                break;
            };
            tried[index] = true;

            match self.channels[index].dequeue() {
                Ok(mbuf) => {
                    consumed = true;
                    if let Some(set) = aligner.push_and_align(index, mbuf)? {
                        report(set);
                        return Ok(ReadStatus::Ready);
                    }
                }
                Err(FlowError::QueueEmpty) => {
                    first_empty.get_or_insert(index);
                }
                Err(e) => return Err(self.fail(index, e)),
            }
        }

        if consumed {
            return Ok(ReadStatus::Partial);
        }
        let index = first_empty.unwrap_or(0);
        Ok(ReadStatus::NotReady {
            index,
            needs_poll: self.channels.get(index).map(|c| c.needs_retry()).unwrap_or(false),
        })
    }

    fn fail(&mut self, index: usize, e: FlowError) -> FlowError {
        error!(queue = %self.channels[index].binding(), error = %e, "input dequeue failed");
        self.failed = Some(e);
        e
    }

    /// Subscribes every event-capable channel to `group_id`.
    pub fn subscribe_all(&self, group_id: u32) -> FlowResult<()> {
        for channel in self.channels.iter().filter(|c| !c.needs_retry()) {
            channel.subscribe_not_empty(group_id)?;
        }
        Ok(())
    }

    /// Drops partially filled slots and aligner state, then drains every
    /// input channel. Returns the number of released buffers.
    pub fn discard_all(&mut self) -> FlowResult<usize> {
        let mut released = self.slots.iter_mut().filter_map(Option::take).count();
        if let Some(aligner) = &self.aligner {
            released += aligner.clear();
        }

        let mut first_error = None;
        for channel in &self.channels {
            match channel.discard_all() {
                Ok(count) => released += count,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(released, "reader discarded pending input");
        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    /// Clears a sticky failure after the owner decided to reuse the reader.
    pub fn reset_failure(&mut self) {
        self.failed = None;
    }
}
