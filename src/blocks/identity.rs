//! Identity block: every input is copied to the output of the same name.

use crate::core::block::{Block, BlockError, BlockIo, BlockSpec, IoSpec, UpdateStatus};

pub struct IdentityBlock;

impl IdentityBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("identity")
            .describe("Forwards each input unchanged")
            .inputs(IoSpec::variable(1, None))
            .outputs(IoSpec::variable(1, None))
    }
}

impl Block for IdentityBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        for i in 0..io.num_inputs() {
            if !io.input_update_available(i)? {
                continue;
            }
            let value = io.input(i)?.clone();
            let timestamp = io.input_timestamp(i)?;
            io.set_output(i, value, Some(timestamp))?;
        }
        Ok(UpdateStatus::Done)
    }
}
