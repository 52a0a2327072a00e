//! Model runtime
//!
//! This module provides the scheduler, the assembler that builds models from
//! parsed sources, the loader for model files, and [`BlockRuntime`], which
//! drives a root model from the outside.

pub mod adapter;
pub mod assembler;
pub mod loader;
pub mod model;
pub mod ports;
pub mod timer;
pub mod validation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::core::block::{BlockIo, UpdateStatus};
use crate::core::config::ConfigMap;
use crate::core::metrics::StatsReport;
use crate::core::registry::Registry;
use crate::core::signal::{Slot, Timestamp, Value};
use crate::error::{Error, RuntimeError};
use crate::lang::ParsedModel;

pub use adapter::ModelFactory;
pub use assembler::assemble;
pub use loader::Loader;
pub use model::Model;

/// One value surfaced on a public output of the root model
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSample {
    pub signal: String,
    pub value: Value,
    pub timestamp: Timestamp,
}

/// Drives a root model: external inputs in, public outputs out
///
/// Holds the slots the root model reads its inputs from and surfaces its
/// outputs on, and records every output change in a trace.
pub struct BlockRuntime {
    model: Model,
    io: BlockIo,
    trace: Vec<OutputSample>,
    cancelled: Arc<AtomicBool>,
    run_id: Uuid,
    cleaned: bool,
}

impl BlockRuntime {
    /// Wrap an assembled model
    pub fn new(model: Model) -> Result<Self, Error> {
        let io = BlockIo::new(
            model.name(),
            model.input_names().to_vec(),
            model.output_names().to_vec(),
            ConfigMap::new(),
        )
        .map_err(|dup| Error::semantic(format!("duplicate public signal {:?}", dup)))?;
        Ok(Self {
            model,
            io,
            trace: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            run_id: Uuid::new_v4(),
            cleaned: false,
        })
    }

    /// Assemble `parsed` as the root model `name`
    ///
    /// The model cannot instance itself, as with nested models.
    pub fn from_parsed(
        parsed: &ParsedModel,
        name: &str,
        config: &ConfigMap,
        registry: &Registry,
    ) -> Result<Self, Error> {
        let scoped = registry.child_forbidding(name);
        Self::new(assemble(parsed, name, config, &scoped)?)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Call `init()` on every block of the model
    pub fn init(&mut self) -> Result<(), Error> {
        self.model.init_blocks()
    }

    /// Push a sample into a public input of the root model
    pub fn from_outside_set_input(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        timestamp: Timestamp,
    ) -> Result<(), Error> {
        let value = value.into();
        self.model.push_input(name, value.clone(), timestamp)?;
        self.io
            .set_input(name, value, timestamp)
            .map_err(|_| RuntimeError::UnknownSignal {
                model: self.model.name().to_string(),
                signal: name.to_string(),
            })?;
        Ok(())
    }

    /// Whether another `update()` would find work
    pub fn has_more(&mut self) -> Result<bool, Error> {
        self.model.has_more()
    }

    /// Run one scheduler step; fails with `Cancelled` once cancelled
    pub fn update(&mut self) -> Result<UpdateStatus, Error> {
        if self.is_cancelled() {
            return Err(RuntimeError::Cancelled.into());
        }
        let before = self.io.outputs().timestamps();
        let status = self.model.step(&mut self.io)?;
        for (i, previous) in before.into_iter().enumerate() {
            let slot = self.io.outputs().slot(i);
            if slot.timestamp != previous {
                if let (Some(name), Some(timestamp)) = (self.io.outputs().name(i), slot.timestamp) {
                    self.trace.push(OutputSample {
                        signal: name.to_string(),
                        value: slot.value.clone(),
                        timestamp,
                    });
                }
            }
        }
        Ok(status)
    }

    /// Last sample accepted on a model input
    pub fn input(&self, name: &str) -> Option<&Slot> {
        self.io.input_slot(name)
    }

    /// Current value of a public output
    pub fn output(&self, name: &str) -> Option<&Slot> {
        self.io.output_slot(name)
    }

    /// Every output change so far, in order
    pub fn trace(&self) -> &[OutputSample] {
        &self.trace
    }

    /// Call `finish()` on every block
    pub fn finish(&mut self) -> Result<(), Error> {
        self.model.finish_blocks()
    }

    /// Call `cleanup()` on every initialized block; only the first call does anything
    pub fn cleanup(&mut self) -> Result<(), Error> {
        if self.cleaned {
            return Ok(());
        }
        self.cleaned = true;
        self.model.cleanup_blocks().map_err(Error::from)
    }

    /// Run the model to completion
    ///
    /// Cleanup is attempted however the run ends; when both the run and the
    /// cleanup fail, the run's error is returned and the cleanup failure is
    /// logged. Returns the number of steps taken.
    pub fn run(&mut self) -> Result<usize, Error> {
        let span = tracing::info_span!("run", run_id = %self.run_id, model = %self.model.model_name());
        let _enter = span.enter();
        tracing::info!(blocks = self.model.block_names().len(), "run started");

        let result = self.drive();
        let cleanup = self.cleanup();
        match (result, cleanup) {
            (Ok(steps), Ok(())) => {
                tracing::info!(steps, "run finished");
                Ok(steps)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => {
                tracing::error!(error = %e, "run failed");
                Err(e)
            }
            (Err(e), Err(cleanup)) => {
                tracing::error!(error = %e, "run failed");
                tracing::error!(error = %cleanup, "cleanup failed after run failure");
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<usize, Error> {
        self.init()?;
        let mut steps = 0;
        while self.has_more()? {
            if self.is_cancelled() {
                tracing::warn!(steps, "run cancelled");
                return Err(RuntimeError::Cancelled.into());
            }
            self.update()?;
            steps += 1;
        }
        self.finish()?;
        Ok(steps)
    }

    /// Handle for cancelling the run from another thread
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Stop before the next step
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Statistics of the run, if enabled at assembly
    pub fn stats(&self) -> Option<StatsReport> {
        self.model.report()
    }
}

impl Drop for BlockRuntime {
    fn drop(&mut self) {
        if self.cleaned || !self.model.was_initialized() {
            return;
        }
        if let Err(e) = self.cleanup() {
            tracing::warn!(model = %self.model.name(), error = %e, "cleanup on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Settings;
    use crate::lang::parse;
    use serde_json::json;

    fn runtime(source: &str) -> BlockRuntime {
        let file = parse(source, None).unwrap();
        let registry = Registry::default_library(Settings::default()).unwrap();
        BlockRuntime::from_parsed(&file.models[0], "main", &ConfigMap::new(), &registry).unwrap()
    }

    #[test]
    fn test_run_constant_chain() {
        let mut rt = runtime("|constant value=7| -> |gain k=3| -> (out)\n");
        let steps = rt.run().unwrap();
        assert!(steps >= 2);
        let out = rt.output("out").unwrap();
        assert_eq!(out.value, json!(21));
        assert_eq!(out.timestamp, Some(Timestamp::ETERNITY));
        assert_eq!(rt.trace().len(), 1);
    }

    #[test]
    fn test_unknown_input_is_rejected() {
        let mut rt = runtime("(x) -> |gain k=2| -> (y)\n");
        rt.init().unwrap();
        let err = rt
            .from_outside_set_input("nope", 1, Timestamp::new(0.0))
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::UnknownSignal { .. })));
    }

    #[test]
    fn test_rejected_input_keeps_last_sample() {
        let mut rt = runtime("(x) -> |gain k=2| -> (y)\n");
        rt.init().unwrap();
        rt.from_outside_set_input("x", 4, Timestamp::new(2.0)).unwrap();
        let err = rt
            .from_outside_set_input("x", 9, Timestamp::new(1.0))
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::InvalidSample { .. })));

        let input = rt.input("x").unwrap();
        assert_eq!(input.value, json!(4));
        assert_eq!(input.timestamp, Some(Timestamp::new(2.0)));
    }

    #[test]
    fn test_cancel_stops_before_next_step() {
        let mut rt = runtime("|constant value=1| -> |gain k=2| -> (y)\n");
        rt.cancel();
        let err = rt.run().unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::Cancelled)));
        assert!(rt.output("y").unwrap().timestamp.is_none());
    }

    #[test]
    fn test_cleanup_runs_once() {
        let mut rt = runtime("|constant value=1| -> y\n");
        rt.init().unwrap();
        rt.cleanup().unwrap();
        rt.cleanup().unwrap();
    }
}
