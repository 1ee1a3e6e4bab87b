use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::message::{DataType, FlowMessage};
use crate::buffers::MbufPool;
use crate::config::InputMode;
use crate::engine::exception::ExceptionRecord;
use crate::engine::model::FlowModel;
use crate::engine::output::{ProcessorOutputs, Transaction};
use crate::error::{FlowError, FlowResult};
use crate::queue::QueueChannel;

/// User function driven by an execution unit.
///
/// A function implements `invoke` for single-set input or
/// `invoke_streaming` for queue-streaming input; the processor picks one
/// from its configured input mode. Returning `ProcPending` asks to be
/// invoked again with the same input; `InitAgain` from `init` asks for
/// another init attempt.
pub trait FlowFunc: Send {
    fn init(&mut self, _ctx: &mut FlowContext) -> FlowResult<()> {
        Ok(())
    }

    fn invoke(&mut self, _ctx: &mut FlowContext, _inputs: Vec<Option<FlowMessage>>) -> FlowResult<()> {
        Err(FlowError::NotSupported)
    }

    fn invoke_streaming(&mut self, _ctx: &mut FlowContext, _inputs: &mut StreamInput<'_>) -> FlowResult<()> {
        Err(FlowError::NotSupported)
    }

    /// Drops per-stream state after the unit recovers from suspension.
    fn reset_state(&mut self) -> FlowResult<()> {
        Ok(())
    }
}

/// Everything a function may touch while it runs.
pub struct FlowContext {
    name: String,
    params: Value,
    pool: MbufPool,
    outputs: Arc<ProcessorOutputs>,
    input_mode: InputMode,
    transaction: Option<Transaction>,
    models: HashMap<String, Arc<FlowModel>>,
    raised: Vec<ExceptionRecord>,
}

impl FlowContext {
    pub(crate) fn new(
        name: impl Into<String>,
        params: Value,
        pool: MbufPool,
        outputs: Arc<ProcessorOutputs>,
        input_mode: InputMode,
        models: HashMap<String, Arc<FlowModel>>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            pool,
            outputs,
            input_mode,
            transaction: None,
            models,
            raised: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn pool(&self) -> &MbufPool {
        &self.pool
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn output_num(&self) -> usize {
        self.outputs.len()
    }

    /// Output indices this function may write.
    pub fn usable_outputs(&self) -> Vec<usize> {
        self.outputs.usable_indices()
    }

    /// Transaction of the input set being processed, if any.
    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction.map(|t| t.trans_id)
    }

    /// Publishes `msg` on output `index`. Backpressure is absorbed by the
    /// replay cache; only hard failures are returned.
    pub fn set_output(&mut self, index: usize, msg: FlowMessage) -> FlowResult<()> {
        let streaming = self.input_mode == InputMode::Streaming;
        self.outputs
            .set_output(index, msg, self.transaction, streaming)
            .map(|_| ())
    }

    pub fn alloc_tensor(&self, dtype: DataType, shape: Vec<i64>, payload: &[u8]) -> FlowResult<FlowMessage> {
        FlowMessage::tensor(&self.pool, dtype, shape, payload)
    }

    pub fn alloc_raw(&self, bytes: &[u8]) -> FlowResult<FlowMessage> {
        FlowMessage::raw(&self.pool, bytes)
    }

    pub fn model(&self, name: &str) -> Option<Arc<FlowModel>> {
        self.models.get(name).cloned()
    }

    /// Runs a nested model synchronously; the inputs inherit the current
    /// transaction id.
    pub fn run_model(&self, name: &str, inputs: Vec<FlowMessage>, timeout: Option<Duration>) -> FlowResult<Vec<FlowMessage>> {
        let model = self.models.get(name).ok_or(FlowError::ParamInvalid)?;
        if let Some(trans_id) = self.transaction_id() {
            for msg in inputs.iter().filter(|msg| msg.transaction_id() == 0) {
                msg.set_transaction_id(trans_id);
            }
        }
        model.run(inputs, timeout)
    }

    /// Reports an exception for the current transaction.
    pub fn raise_exception(&mut self, code: i32, context: impl Into<String>) -> FlowResult<()> {
        let trans_id = self.transaction_id().ok_or(FlowError::ParamInvalid)?;
        self.raised.push(ExceptionRecord::new(trans_id, code, context));
        Ok(())
    }

    pub(crate) fn begin_transaction(&mut self, transaction: Option<Transaction>) {
        self.transaction = transaction;
    }

    pub(crate) fn take_raised(&mut self) -> Vec<ExceptionRecord> {
        std::mem::take(&mut self.raised)
    }
}

/// Direct access to the input queues for streaming functions.
pub struct StreamInput<'a> {
    channels: &'a [Arc<dyn QueueChannel>],
}

impl<'a> StreamInput<'a> {
    pub(crate) fn new(channels: &'a [Arc<dyn QueueChannel>]) -> Self {
        Self { channels }
    }

    pub fn input_num(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> FlowResult<&Arc<dyn QueueChannel>> {
        self.channels.get(index).ok_or(FlowError::ParamInvalid)
    }

    /// Non-blocking; `QueueEmpty` when nothing is queued.
    pub fn try_dequeue(&self, index: usize) -> FlowResult<FlowMessage> {
        FlowMessage::from_mbuf(self.channel(index)?.dequeue()?)
    }

    pub fn dequeue_timeout(&self, index: usize, timeout: Duration) -> FlowResult<FlowMessage> {
        FlowMessage::from_mbuf(self.channel(index)?.dequeue_with_timeout(timeout)?)
    }

    pub fn queued(&self, index: usize) -> FlowResult<usize> {
        self.channel(index)?.size()
    }
}
