//! Print block: logs every new input sample.

use crate::core::block::{Block, BlockError, BlockIo, BlockSpec, IoSpec, UpdateStatus};

pub struct PrintBlock;

impl PrintBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("print")
            .describe("Logs each new input value")
            .inputs(IoSpec::variable(0, None))
    }
}

impl Block for PrintBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        for i in 0..io.num_inputs() {
            if !io.input_update_available(i)? {
                continue;
            }
            let signal = io.input_names()[i].clone();
            let timestamp = io.input_timestamp(i)?;
            tracing::info!(
                block = %io.name(),
                signal = %signal,
                timestamp = %timestamp,
                value = %io.input(i)?,
                "print"
            );
        }
        Ok(UpdateStatus::Done)
    }
}
