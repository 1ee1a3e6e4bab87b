use crate::core::{DataType, FlowContext, FlowFunc, FlowMessage};
use crate::error::FlowResult;
use flowexec_macros::FlowFunc;

/// Emits one `u64` tensor of shape `[1]` per invocation on every usable
/// output, counting from `start` by `step`. Stops emitting after `limit`
/// values when `limit` is non-zero.
#[derive(FlowFunc, Debug)]
#[flow_func(name = "counter_source", description = "Emit an incrementing u64 counter")]
pub struct CounterSource {
    #[param(default = "0")]
    pub start: u64,
    #[param(default = "1")]
    pub step: u64,
    #[param(default = "0")]
    pub limit: u64,
    next: u64,
    emitted: u64,
}

impl Default for CounterSource {
    fn default() -> Self {
        Self {
            start: 0,
            step: 1,
            limit: 0,
            next: 0,
            emitted: 0,
        }
    }
}

impl CounterSource {
    pub fn exhausted(&self) -> bool {
        self.limit > 0 && self.emitted >= self.limit
    }
}

impl FlowFunc for CounterSource {
    fn init(&mut self, ctx: &mut FlowContext) -> FlowResult<()> {
        let params = ctx.params();
        if let Some(start) = params["start"].as_u64() {
            self.start = start;
        }
        if let Some(step) = params["step"].as_u64() {
            self.step = step;
        }
        if let Some(limit) = params["limit"].as_u64() {
            self.limit = limit;
        }
        self.next = self.start;
        self.emitted = 0;
        Ok(())
    }

    fn invoke(&mut self, ctx: &mut FlowContext, _inputs: Vec<Option<FlowMessage>>) -> FlowResult<()> {
        if self.exhausted() {
            return Ok(());
        }

        let value = self.next.to_le_bytes();
        for index in ctx.usable_outputs() {
            let msg = ctx.alloc_tensor(DataType::UInt64, vec![1], &value)?;
            ctx.set_output(index, msg)?;
        }
        self.next = self.next.wrapping_add(self.step);
        self.emitted += 1;
        Ok(())
    }

    fn reset_state(&mut self) -> FlowResult<()> {
        self.next = self.start;
        self.emitted = 0;
        Ok(())
    }
}
