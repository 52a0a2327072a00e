//! Constant block
//!
//! Emits its configured value once, stamped [`Timestamp::ETERNITY`].

use crate::core::block::{Block, BlockError, BlockIo, BlockSpec, IoSpec, SignalDecl, UpdateStatus};
use crate::core::config::{ConfigDecl, ConfigMap};
use crate::core::signal::{Timestamp, Value};

pub struct ConstantBlock {
    value: Value,
    emitted: bool,
}

impl ConstantBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("constant")
            .describe("Emits a configured value once, valid for all time")
            .config(ConfigDecl::required("value", "value to emit"))
            .outputs(IoSpec::Fixed(vec![SignalDecl::new("value", "the configured value")]))
    }

    pub fn new(config: &ConfigMap) -> Result<Self, BlockError> {
        let value = config
            .get("value")
            .cloned()
            .ok_or_else(|| BlockError::MissingConfig("value".into()))?;
        Ok(Self {
            value,
            emitted: false,
        })
    }
}

impl Block for ConstantBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        if !self.emitted {
            io.set_output("value", self.value.clone(), Some(Timestamp::ETERNITY))?;
            self.emitted = true;
        }
        Ok(UpdateStatus::Done)
    }
}
