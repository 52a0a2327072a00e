//! Sequence generator
//!
//! Emits the configured `values` one per update, the i-th stamped
//! `start + i * interval`.

use serde_json::Value;

use crate::core::block::{
    Block, BlockError, BlockIo, BlockSpec, DataStatus, IoSpec, SignalDecl, UpdateStatus,
};
use crate::core::config::{ConfigDecl, ConfigMap};
use crate::core::signal::Timestamp;

pub struct SequenceBlock {
    values: Vec<Value>,
    start: f64,
    interval: f64,
    next: usize,
}

fn parse<T: serde::de::DeserializeOwned>(config: &ConfigMap, key: &str) -> Result<T, BlockError> {
    let value = config
        .get(key)
        .ok_or_else(|| BlockError::MissingConfig(key.to_string()))?;
    serde_json::from_value(value.clone()).map_err(|e| BlockError::InvalidConfig {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl SequenceBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("sequence")
            .describe("Generator emitting a list of values at regular timestamps")
            .config(ConfigDecl::required("values", "list of values to emit").hint("list"))
            .config(ConfigDecl::with_default("start", 0.0, "timestamp of the first value"))
            .config(ConfigDecl::with_default("interval", 1.0, "seconds between values"))
            .outputs(IoSpec::Fixed(vec![SignalDecl::new("value", "current value")]))
    }

    pub fn new(config: &ConfigMap) -> Result<Self, BlockError> {
        let interval: f64 = parse(config, "interval")?;
        if interval.is_nan() || interval <= 0.0 {
            return Err(BlockError::InvalidConfig {
                key: "interval".into(),
                reason: format!("must be positive, got {}", interval),
            });
        }
        Ok(Self {
            values: parse(config, "values")?,
            start: parse(config, "start")?,
            interval,
            next: 0,
        })
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        Timestamp::new(self.start + i as f64 * self.interval)
    }
}

impl Block for SequenceBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        if let Some(value) = self.values.get(self.next) {
            io.set_output("value", value.clone(), Some(self.timestamp(self.next)))?;
            self.next += 1;
        }
        Ok(UpdateStatus::Done)
    }

    fn is_generator(&self) -> bool {
        true
    }

    fn next_data_status(&mut self) -> Result<DataStatus, BlockError> {
        Ok(if self.next < self.values.len() {
            DataStatus::HasNext(Some(self.timestamp(self.next)))
        } else {
            DataStatus::NoMore
        })
    }
}
