//! Block trait and related types
//!
//! This module defines the core Block trait that all blocks must implement,
//! the engine-owned [`BlockIo`] through which a block reads its inputs and
//! writes its outputs, the block type metadata ([`BlockSpec`]) used by the
//! assembler before any instance exists, and the block error type.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::config::{ConfigDecl, ConfigMap};
use super::metrics::StatsReport;
use super::signal::{SignalId, SignalTable, Slot, Timestamp, Value};
use crate::error::WriterError;

/// Outcome of one `update()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The block is done for now
    Done,
    /// The block wants another turn immediately
    NotFinished,
}

/// Answer of a generator to "do you have more data?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    /// Next sample available; `None` means its timestamp is not known yet
    HasNext(Option<Timestamp>),
    /// The generator is exhausted
    NoMore,
}

impl DataStatus {
    pub fn has_next(&self) -> bool {
        matches!(self, DataStatus::HasNext(_))
    }
}

/// Core block trait that all blocks must implement
///
/// The engine calls `init()` once, `update()` zero or more times, then
/// `finish()` on a normal end and `cleanup()` exactly once in every case.
pub trait Block: Send {
    /// Initialize the block
    fn init(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(())
    }

    /// Compute outputs from the currently ready inputs
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError>;

    /// Lifecycle hook: normal end of the run
    fn finish(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(())
    }

    /// Lifecycle hook: release resources, called even after failures
    fn cleanup(&mut self) -> Result<(), BlockError> {
        Ok(())
    }

    /// Whether this block injects data from outside the graph
    fn is_generator(&self) -> bool {
        false
    }

    /// Generator status; only asked of blocks where `is_generator()` holds
    fn next_data_status(&mut self) -> Result<DataStatus, BlockError> {
        Ok(DataStatus::NoMore)
    }

    /// Whether the block has queued work of its own (nested models)
    fn has_pending_work(&self) -> bool {
        false
    }

    /// Statistics of the graph inside this block, if it is a model
    fn stats_report(&self) -> Option<StatsReport> {
        None
    }
}

/// Engine-owned I/O state of one block instance
///
/// Holds the input and output slots, the resolved configuration, the private
/// state table and the per-input latches behind
/// [`BlockIo::input_update_available`].
#[derive(Debug, Clone)]
pub struct BlockIo {
    name: String,
    inputs: SignalTable,
    outputs: SignalTable,
    config: ConfigMap,
    state: HashMap<String, Value>,
    last_seen: HashMap<usize, Timestamp>,
}

impl BlockIo {
    /// Create the I/O of a block; fails with the first duplicated signal name
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        config: ConfigMap,
    ) -> Result<Self, String> {
        Ok(Self {
            name: name.into(),
            inputs: SignalTable::new(inputs)?,
            outputs: SignalTable::new(outputs)?,
            config,
            state: HashMap::new(),
            last_seen: HashMap::new(),
        })
    }

    /// Name of the block instance
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &SignalTable {
        &self.inputs
    }

    pub fn outputs(&self) -> &SignalTable {
        &self.outputs
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_names(&self) -> &[String] {
        self.inputs.names()
    }

    pub fn output_names(&self) -> &[String] {
        self.outputs.names()
    }

    fn input_position(&self, id: SignalId<'_>) -> Result<usize, BlockError> {
        self.inputs
            .position(id)
            .ok_or_else(|| BlockError::UnknownInput(id.to_string()))
    }

    fn output_position(&self, id: SignalId<'_>) -> Result<usize, BlockError> {
        self.outputs
            .position(id)
            .ok_or_else(|| BlockError::UnknownOutput(id.to_string()))
    }

    fn ready_input(&self, id: SignalId<'_>) -> Result<&Slot, BlockError> {
        let slot = self.inputs.slot(self.input_position(id)?);
        if !slot.is_ready() {
            return Err(BlockError::InputNotReady(id.to_string()));
        }
        Ok(slot)
    }

    // ── Functions used by blocks ────────────────────────────────────────

    /// Value of an input; fails if the input is not ready
    pub fn input<'a>(&self, id: impl Into<SignalId<'a>>) -> Result<&Value, BlockError> {
        Ok(&self.ready_input(id.into())?.value)
    }

    /// Timestamp of an input; fails if the input is not ready
    pub fn input_timestamp<'a>(&self, id: impl Into<SignalId<'a>>) -> Result<Timestamp, BlockError> {
        let slot = self.ready_input(id.into())?;
        slot.timestamp
            .ok_or_else(|| BlockError::InputNotReady(self.name.clone()))
    }

    /// Whether an input has received at least one sample
    pub fn input_ready<'a>(&self, id: impl Into<SignalId<'a>>) -> Result<bool, BlockError> {
        let i = self.input_position(id.into())?;
        Ok(self.inputs.slot(i).is_ready())
    }

    /// Whether every input has received at least one sample
    pub fn all_inputs_ready(&self) -> bool {
        self.inputs.slots().iter().all(Slot::is_ready)
    }

    /// Whether the input changed since the last time this was asked for it
    ///
    /// Edge-triggered: the first call on a ready input answers true, later
    /// calls answer true only if the timestamp moved. Unready inputs answer
    /// false and do not arm the latch.
    pub fn input_update_available<'a>(
        &mut self,
        id: impl Into<SignalId<'a>>,
    ) -> Result<bool, BlockError> {
        let i = self.input_position(id.into())?;
        let current = match self.inputs.slot(i).timestamp {
            Some(ts) => ts,
            None => return Ok(false),
        };
        Ok(self.last_seen.insert(i, current) != Some(current))
    }

    /// Write an output
    ///
    /// Without an explicit timestamp the output takes the largest timestamp
    /// among the ready inputs. Timestamps must not go backwards on a slot.
    pub fn set_output<'a>(
        &mut self,
        id: impl Into<SignalId<'a>>,
        value: impl Into<Value>,
        timestamp: Option<Timestamp>,
    ) -> Result<(), BlockError> {
        let id = id.into();
        let i = self.output_position(id)?;
        let timestamp = match timestamp {
            Some(ts) => ts,
            None => self
                .inputs
                .max_timestamp()
                .ok_or_else(|| BlockError::MissingTimestamp(id.to_string()))?,
        };

        let slot = self.outputs.slot_mut(i);
        if let Some(previous) = slot.timestamp {
            if timestamp < previous {
                return Err(BlockError::NonMonotonic {
                    signal: id.to_string(),
                    previous,
                    attempted: timestamp,
                });
            }
        }
        slot.write(value.into(), timestamp);
        Ok(())
    }

    /// Raw config value
    pub fn config(&self, key: &str) -> Result<&Value, BlockError> {
        self.config
            .get(key)
            .ok_or_else(|| BlockError::MissingConfig(key.to_string()))
    }

    /// Config value converted to a concrete type
    pub fn config_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, BlockError> {
        let value = self.config(key)?;
        serde_json::from_value(value.clone()).map_err(|e| BlockError::InvalidConfig {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// The whole resolved configuration
    pub fn config_map(&self) -> &ConfigMap {
        &self.config
    }

    /// Set a private state variable
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    /// Read a private state variable
    pub fn state(&self, key: &str) -> Result<&Value, BlockError> {
        self.state
            .get(key)
            .ok_or_else(|| BlockError::UnknownState(key.to_string()))
    }

    // ── Functions used by the engine ────────────────────────────────────

    /// Write an input slot from outside the block
    pub fn set_input<'a>(
        &mut self,
        id: impl Into<SignalId<'a>>,
        value: Value,
        timestamp: Timestamp,
    ) -> Result<(), BlockError> {
        let i = self.input_position(id.into())?;
        self.inputs.slot_mut(i).write(value, timestamp);
        Ok(())
    }

    /// Output slot by position or name
    pub fn output_slot<'a>(&self, id: impl Into<SignalId<'a>>) -> Option<&Slot> {
        self.outputs.position(id.into()).map(|i| self.outputs.slot(i))
    }

    /// Input slot by position or name
    pub fn input_slot<'a>(&self, id: impl Into<SignalId<'a>>) -> Option<&Slot> {
        self.inputs.position(id.into()).map(|i| self.inputs.slot(i))
    }
}

/// Block errors
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Input read before it received any sample
    #[error("input {0} is not ready")]
    InputNotReady(String),

    /// No input with that name or index
    #[error("unknown input {0}")]
    UnknownInput(String),

    /// No output with that name or index
    #[error("unknown output {0}")]
    UnknownOutput(String),

    /// Config key not present
    #[error("missing config {0:?}")]
    MissingConfig(String),

    /// Config value of the wrong shape
    #[error("invalid config {key:?}: {reason}")]
    InvalidConfig { key: String, reason: String },

    /// Output timestamp went backwards
    #[error("output {signal} went back in time: {attempted} < {previous}")]
    NonMonotonic {
        signal: String,
        previous: Timestamp,
        attempted: Timestamp,
    },

    /// Output set without timestamp and no input to derive one
    #[error("cannot set output {0} without a timestamp: no input is ready")]
    MissingTimestamp(String),

    /// Unknown private state variable
    #[error("no state variable {0:?}")]
    UnknownState(String),

    /// Failure reported by the block itself
    #[error("{0}")]
    Failed(String),

    /// Failure inside a nested model
    #[error(transparent)]
    Nested(Box<crate::error::Error>),
}

impl BlockError {
    /// Failure with a free-form message
    pub fn failed(message: impl Into<String>) -> Self {
        BlockError::Failed(message.into())
    }
}

impl From<std::io::Error> for BlockError {
    fn from(error: std::io::Error) -> Self {
        BlockError::Failed(format!("I/O error: {}", error))
    }
}

impl From<crate::error::Error> for BlockError {
    fn from(error: crate::error::Error) -> Self {
        BlockError::Nested(Box::new(error))
    }
}

/// Declared signal of a block type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDecl {
    pub name: String,
    pub description: String,
}

impl SignalDecl {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Computes signal names from the frozen config of an instance
pub type RuntimeIoFn = Arc<dyn Fn(&ConfigMap) -> Result<Vec<String>, BlockError> + Send + Sync>;

/// Shape of a block type's inputs or outputs
#[derive(Clone)]
pub enum IoSpec {
    /// A fixed ordered list of names
    Fixed(Vec<SignalDecl>),
    /// `min..=max` unnamed signals, named by the assembler; as outputs,
    /// mirrors the input names one-to-one
    Variable { min: usize, max: Option<usize> },
    /// Names computed from the config once it is frozen
    DefinedAtRuntime(RuntimeIoFn),
}

impl IoSpec {
    /// No signals at all
    pub fn none() -> Self {
        IoSpec::Fixed(Vec::new())
    }

    /// Fixed signals without descriptions
    pub fn fixed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IoSpec::Fixed(
            names
                .into_iter()
                .map(|n| SignalDecl::new(n, ""))
                .collect(),
        )
    }

    /// Variable number of signals
    pub fn variable(min: usize, max: Option<usize>) -> Self {
        IoSpec::Variable { min, max }
    }

    /// Signals computed at runtime
    pub fn runtime<F>(f: F) -> Self
    where
        F: Fn(&ConfigMap) -> Result<Vec<String>, BlockError> + Send + Sync + 'static,
    {
        IoSpec::DefinedAtRuntime(Arc::new(f))
    }

    /// Names of a fixed shape
    pub fn fixed_names(&self) -> Option<Vec<String>> {
        match self {
            IoSpec::Fixed(decls) => Some(decls.iter().map(|d| d.name.clone()).collect()),
            _ => None,
        }
    }
}

impl fmt::Debug for IoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoSpec::Fixed(decls) => f.debug_tuple("Fixed").field(decls).finish(),
            IoSpec::Variable { min, max } => f
                .debug_struct("Variable")
                .field("min", min)
                .field("max", max)
                .finish(),
            IoSpec::DefinedAtRuntime(_) => write!(f, "DefinedAtRuntime(..)"),
        }
    }
}

/// Block type metadata, readable before any instance is created
#[derive(Debug, Clone)]
pub struct BlockSpec {
    /// Type name used in models
    pub name: String,
    /// Brief description of the block
    pub description: String,
    /// Declared config keys
    pub config: Vec<ConfigDecl>,
    /// Declared inputs
    pub inputs: IoSpec,
    /// Declared outputs
    pub outputs: IoSpec,
}

impl BlockSpec {
    /// A block type with no config and no signals
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            config: Vec::new(),
            inputs: IoSpec::none(),
            outputs: IoSpec::none(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn config(mut self, decl: ConfigDecl) -> Self {
        self.config.push(decl);
        self
    }

    pub fn inputs(mut self, inputs: IoSpec) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: IoSpec) -> Self {
        self.outputs = outputs;
        self
    }

    /// Reject declarations no instance could satisfy
    pub fn validate(&self) -> Result<(), WriterError> {
        if self.name.trim().is_empty() {
            return Err(WriterError::new("", "block type name cannot be empty"));
        }

        for (what, spec) in [("input", &self.inputs), ("output", &self.outputs)] {
            match spec {
                IoSpec::Fixed(decls) => {
                    if let Some(dup) = first_duplicate(decls.iter().map(|d| d.name.as_str())) {
                        return Err(WriterError::new(
                            &self.name,
                            format!("duplicate {} name {:?}", what, dup),
                        ));
                    }
                }
                IoSpec::Variable { min, max: Some(max) } if min > max => {
                    return Err(WriterError::new(
                        &self.name,
                        format!("variable {} range is empty: min {} > max {}", what, min, max),
                    ));
                }
                _ => {}
            }
        }

        if let Some(dup) = first_duplicate(self.config.iter().map(|d| d.name.as_str())) {
            return Err(WriterError::new(
                &self.name,
                format!("duplicate config key {:?}", dup),
            ));
        }

        Ok(())
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = std::collections::HashSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn io(inputs: &[&str], outputs: &[&str]) -> BlockIo {
        BlockIo::new(
            "b",
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
            ConfigMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_reading_unready_input_fails() {
        let io = io(&["x"], &["y"]);
        assert!(matches!(io.input("x"), Err(BlockError::InputNotReady(_))));
        assert!(!io.input_ready("x").unwrap());
        assert!(matches!(io.input_ready("z"), Err(BlockError::UnknownInput(_))));
    }

    #[test]
    fn test_default_output_timestamp_is_max_input() {
        let mut io = io(&["a", "b"], &["y"]);
        io.set_input("a", json!(1), Timestamp::new(2.0)).unwrap();
        io.set_input(1usize, json!(2), Timestamp::new(5.0)).unwrap();

        io.set_output("y", json!(3), None).unwrap();
        let slot = io.output_slot("y").unwrap();
        assert_eq!(slot.timestamp, Some(Timestamp::new(5.0)));
    }

    #[test]
    fn test_output_without_inputs_needs_timestamp() {
        let mut io = io(&[], &["y"]);
        assert!(matches!(
            io.set_output("y", json!(1), None),
            Err(BlockError::MissingTimestamp(_))
        ));
        io.set_output("y", json!(1), Some(Timestamp::ETERNITY)).unwrap();
    }

    #[test]
    fn test_output_timestamps_are_monotonic() {
        let mut io = io(&[], &["y"]);
        io.set_output("y", json!(1), Some(Timestamp::new(2.0))).unwrap();
        io.set_output("y", json!(2), Some(Timestamp::new(2.0))).unwrap();
        let err = io
            .set_output("y", json!(3), Some(Timestamp::new(1.0)))
            .unwrap_err();
        assert!(matches!(err, BlockError::NonMonotonic { .. }));
        assert_eq!(io.output_slot("y").unwrap().value, json!(2));
    }

    #[test]
    fn test_input_update_available_is_edge_triggered() {
        let mut io = io(&["x"], &[]);
        assert!(!io.input_update_available("x").unwrap());

        io.set_input("x", json!(1), Timestamp::new(1.0)).unwrap();
        assert!(io.input_update_available("x").unwrap());
        assert!(!io.input_update_available("x").unwrap());

        io.set_input("x", json!(2), Timestamp::new(2.0)).unwrap();
        assert!(io.input_update_available(0usize).unwrap());
        assert!(!io.input_update_available("x").unwrap());
    }

    #[test]
    fn test_config_as() {
        let mut config = ConfigMap::new();
        config.insert("k".into(), json!(2.5));
        let io = BlockIo::new("b", vec![], vec![], config).unwrap();

        let k: f64 = io.config_as("k").unwrap();
        assert_eq!(k, 2.5);
        assert!(matches!(
            io.config_as::<String>("k"),
            Err(BlockError::InvalidConfig { .. })
        ));
        assert!(matches!(io.config("missing"), Err(BlockError::MissingConfig(_))));
    }

    #[test]
    fn test_state_round_trip() {
        let mut io = io(&[], &[]);
        io.set_state("count", 3);
        assert_eq!(io.state("count").unwrap(), &json!(3));
        assert!(io.state("other").is_err());
    }

    #[test]
    fn test_spec_validation() {
        let ok = BlockSpec::new("gain")
            .inputs(IoSpec::fixed(["x"]))
            .outputs(IoSpec::fixed(["y"]));
        assert!(ok.validate().is_ok());

        let dup = BlockSpec::new("bad").inputs(IoSpec::fixed(["x", "x"]));
        assert!(dup.validate().is_err());

        let empty_range = BlockSpec::new("bad").inputs(IoSpec::variable(3, Some(2)));
        assert!(empty_range.validate().is_err());

        let dup_config = BlockSpec::new("bad")
            .config(ConfigDecl::required("k", ""))
            .config(ConfigDecl::required("k", ""));
        assert!(dup_config.validate().is_err());

        assert!(BlockSpec::new(" ").validate().is_err());
    }
}
