use crate::core::{FlowContext, FlowFunc, FlowMessage};
use crate::error::FlowResult;
use flowexec_macros::FlowFunc;
use tracing::{debug, info};

#[derive(FlowFunc, Debug, Default)]
#[flow_func(name = "sink", description = "Consume and release every input")]
pub struct Sink {
    #[param(default = "0")]
    pub log_every: u64,
    consumed: u64,
}

impl FlowFunc for Sink {
    fn init(&mut self, ctx: &mut FlowContext) -> FlowResult<()> {
        if let Some(every) = ctx.params()["log_every"].as_u64() {
            self.log_every = every;
        }
        Ok(())
    }

    fn invoke(&mut self, ctx: &mut FlowContext, inputs: Vec<Option<FlowMessage>>) -> FlowResult<()> {
        for msg in inputs.iter().flatten() {
            debug!(sink = %ctx.name(), trans_id = msg.transaction_id(), ret_code = msg.ret_code(), "consumed");
        }
        self.consumed += 1;
        if self.log_every > 0 && self.consumed % self.log_every == 0 {
            info!(sink = %ctx.name(), consumed = self.consumed, "sink progress");
        }
        Ok(())
    }

    fn reset_state(&mut self) -> FlowResult<()> {
        self.consumed = 0;
        Ok(())
    }
}
