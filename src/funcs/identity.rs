use crate::core::{FlowContext, FlowFunc, FlowMessage};
use crate::error::FlowResult;
use flowexec_macros::FlowFunc;

/// Forwards input `i` to output `i`. Absent inputs of a best-effort set and
/// inputs without a usable output are skipped.
#[derive(FlowFunc, Debug, Default)]
#[flow_func(name = "identity", description = "Forward every input to the output with the same index")]
pub struct Identity {
    forwarded: u64,
}

impl Identity {
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

impl FlowFunc for Identity {
    fn invoke(&mut self, ctx: &mut FlowContext, inputs: Vec<Option<FlowMessage>>) -> FlowResult<()> {
        let usable = ctx.usable_outputs();
        for (index, msg) in inputs.into_iter().enumerate() {
            if !usable.contains(&index) {
                continue;
            }
            if let Some(msg) = msg {
                ctx.set_output(index, msg)?;
                self.forwarded += 1;
            }
        }
        Ok(())
    }

    fn reset_state(&mut self) -> FlowResult<()> {
        self.forwarded = 0;
        Ok(())
    }
}
