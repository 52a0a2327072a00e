//! Test blocks and helpers shared by the suites

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::block::{
    Block, BlockError, BlockIo, BlockSpec, DataStatus, IoSpec, UpdateStatus,
};
use crate::core::config::{ConfigDecl, ConfigMap, Settings};
use crate::core::registry::Registry;
use crate::core::signal::{Timestamp, Value};
use crate::error::Error;
use crate::lang::parse;
use crate::runtime::{BlockRuntime, Loader, ModelFactory};

/// `(input name, value, timestamp)` as seen by a `record` block
pub type Samples = Arc<Mutex<Vec<(String, Value, Timestamp)>>>;

/// Lifecycle calls as `"{block}.{method}"`
pub type Events = Arc<Mutex<Vec<String>>>;

/// Records every fresh input sample
struct Recorder {
    samples: Samples,
}

impl Block for Recorder {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        for i in 0..io.num_inputs() {
            if io.input_update_available(i)? {
                let name = io.input_names()[i].clone();
                self.samples
                    .lock()
                    .push((name, io.input(i)?.clone(), io.input_timestamp(i)?));
            }
        }
        Ok(UpdateStatus::Done)
    }
}

/// Forwards its inputs, logs lifecycle calls and fails on demand
///
/// Config: `fail` names a method to fail in, `panic` turns the failure into
/// a panic, `rounds` makes `update` return `NotFinished` that many times.
struct Probe {
    name: String,
    events: Events,
    fail: String,
    panic: bool,
    rounds: u64,
    pending: u64,
}

impl Probe {
    fn event(&self, method: &str) -> Result<(), BlockError> {
        self.events.lock().push(format!("{}.{}", self.name, method));
        if self.fail == method {
            if self.panic {
                panic!("{} exploded in {}", self.name, method);
            }
            return Err(BlockError::failed(format!("{} failed on purpose", method)));
        }
        Ok(())
    }
}

impl Block for Probe {
    fn init(&mut self, io: &mut BlockIo) -> Result<(), BlockError> {
        self.name = io.name().to_string();
        self.event("init")
    }

    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        self.event("update")?;
        if self.pending == 0 {
            self.pending = self.rounds;
        }
        if self.pending > 1 {
            self.pending -= 1;
            return Ok(UpdateStatus::NotFinished);
        }
        self.pending = 0;
        for i in 0..io.num_inputs() {
            if io.input_update_available(i)? {
                let value = io.input(i)?.clone();
                let timestamp = io.input_timestamp(i)?;
                io.set_output(i, value, Some(timestamp))?;
            }
        }
        Ok(UpdateStatus::Done)
    }

    fn finish(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        self.event("finish")
    }

    fn cleanup(&mut self) -> Result<(), BlockError> {
        self.event("cleanup")
    }
}

/// Generator whose next timestamp is never known in advance
struct Blind {
    remaining: Vec<Value>,
    clock: f64,
}

impl Block for Blind {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        if !self.remaining.is_empty() {
            let value = self.remaining.remove(0);
            self.clock += 1.0;
            io.set_output("value", value, Some(Timestamp::new(self.clock)))?;
        }
        Ok(UpdateStatus::Done)
    }

    fn is_generator(&self) -> bool {
        true
    }

    fn next_data_status(&mut self) -> Result<DataStatus, BlockError> {
        Ok(if self.remaining.is_empty() {
            DataStatus::NoMore
        } else {
            DataStatus::HasNext(None)
        })
    }
}

fn config_str(config: &ConfigMap, key: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Default library plus `record`, `probe`, `blind` and `merge`
pub struct TestBed {
    pub registry: Registry,
    pub samples: Samples,
    pub events: Events,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let registry = Registry::default_library(settings).unwrap();
        let samples: Samples = Arc::default();
        let events: Events = Arc::default();

        let sink = samples.clone();
        registry
            .register_fn(
                BlockSpec::new("record").inputs(IoSpec::variable(1, None)),
                move |_| {
                    Ok(Box::new(Recorder {
                        samples: sink.clone(),
                    }) as Box<dyn Block>)
                },
            )
            .unwrap();

        let log = events.clone();
        registry
            .register_fn(
                BlockSpec::new("probe")
                    .config(ConfigDecl::with_default("fail", "", "method to fail in"))
                    .config(ConfigDecl::with_default("panic", false, "panic instead of failing"))
                    .config(ConfigDecl::with_default("rounds", 1, "updates per dispatch"))
                    .inputs(IoSpec::variable(0, None))
                    .outputs(IoSpec::variable(0, None)),
                move |config| {
                    Ok(Box::new(Probe {
                        name: String::new(),
                        events: log.clone(),
                        fail: config_str(config, "fail"),
                        panic: config.get("panic").and_then(Value::as_bool).unwrap_or(false),
                        rounds: config.get("rounds").and_then(Value::as_u64).unwrap_or(1).max(1),
                        pending: 0,
                    }) as Box<dyn Block>)
                },
            )
            .unwrap();

        registry
            .register_fn(
                BlockSpec::new("blind")
                    .config(ConfigDecl::required("values", "values to emit"))
                    .outputs(IoSpec::fixed(["value"])),
                |config| {
                    let remaining = config
                        .get("values")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    Ok(Box::new(Blind {
                        remaining,
                        clock: 0.0,
                    }) as Box<dyn Block>)
                },
            )
            .unwrap();

        registry
            .register_fn(
                BlockSpec::new("merge")
                    .inputs(IoSpec::variable(2, Some(4)))
                    .outputs(IoSpec::variable(2, Some(4))),
                |_| {
                    Ok(Box::new(Probe {
                        name: String::new(),
                        events: Arc::default(),
                        fail: String::new(),
                        panic: false,
                        rounds: 1,
                        pending: 0,
                    }) as Box<dyn Block>)
                },
            )
            .unwrap();

        Self {
            registry,
            samples,
            events,
        }
    }

    /// Register every named model of `source`
    pub fn define(&self, source: &str) {
        let file = parse(source, None).unwrap();
        for model in file.models {
            let name = model.name.clone().unwrap();
            self.registry
                .register(Arc::new(ModelFactory::new(name, Arc::new(model))))
                .unwrap();
        }
    }

    /// Assemble the first model of `source` as the root
    pub fn runtime(&self, source: &str) -> Result<BlockRuntime, Error> {
        self.runtime_with(source, &ConfigMap::new())
    }

    pub fn runtime_with(&self, source: &str, config: &ConfigMap) -> Result<BlockRuntime, Error> {
        let file = parse(source, None)?;
        let model = &file.models[0];
        let name = model.name.clone().unwrap_or_else(|| "main".to_string());
        BlockRuntime::from_parsed(model, &name, config, &self.registry)
    }

    pub fn values(&self) -> Vec<Value> {
        self.samples.lock().iter().map(|(_, v, _)| v.clone()).collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Events of one method, in call order
    pub fn calls(&self, method: &str) -> Vec<String> {
        let suffix = format!(".{}", method);
        self.events()
            .into_iter()
            .filter(|e| e.ends_with(&suffix))
            .collect()
    }

    /// Use an empty search path so imports never touch the environment
    pub fn isolate(&self) {
        self.registry.set_loader(Loader::new(Vec::new(), false));
    }
}

/// Error text, failing the test on success
pub fn error_text<T>(result: Result<T, Error>) -> String {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(e) => e.to_string(),
    }
}
