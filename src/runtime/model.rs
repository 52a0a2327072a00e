//! Model and scheduler
//!
//! A [`Model`] owns a graph of block instances together with their I/O and
//! the connections between them, and drives it one step at a time:
//! - a FIFO ready queue, with head re-insertion for `NotFinished`
//! - generators picked by smallest known next timestamp once the queue drains
//! - strictly-newer propagation along outgoing connections
//!
//! A model is itself a [`Block`], so models nest.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use crate::core::block::{Block, BlockError, BlockIo, DataStatus, UpdateStatus};
use crate::core::metrics::{ExecutionStats, StatsReport};
use crate::core::signal::{Connection, Slot, Timestamp, Value};
use crate::error::{
    BlockMethodError, CleanupError, Error, Method, RuntimeError, SemanticError,
};
use crate::lang::Location;

use super::ports::NodeKind;
use super::timer::Timer;

/// One block instance inside a model
pub struct Node {
    pub name: String,
    pub type_name: String,
    pub kind: NodeKind,
    pub location: Option<Location>,
    block: Box<dyn Block>,
    io: BlockIo,
    generator: bool,
    updates: usize,
    init_called: bool,
    cleaned: bool,
}

impl Node {
    pub fn new(
        type_name: impl Into<String>,
        kind: NodeKind,
        block: Box<dyn Block>,
        io: BlockIo,
        location: Option<Location>,
    ) -> Self {
        let generator = block.is_generator();
        Self {
            name: io.name().to_string(),
            type_name: type_name.into(),
            kind,
            location,
            block,
            io,
            generator,
            updates: 0,
            init_called: false,
            cleaned: false,
        }
    }

    pub fn io(&self) -> &BlockIo {
        &self.io
    }

    pub fn is_generator(&self) -> bool {
        self.generator
    }

    /// Run one block method, turning errors and panics into [`Error`]
    fn call<T>(
        &mut self,
        method: Method,
        f: impl FnOnce(&mut dyn Block, &mut BlockIo) -> Result<T, BlockError>,
    ) -> Result<T, Error> {
        let Node { block, io, name, .. } = self;
        match panic::catch_unwind(AssertUnwindSafe(|| f(block.as_mut(), io))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(wrap_block_error(method, name, error)),
            Err(payload) => Err(BlockMethodError::new(method, name.clone(), panic_message(payload)).into()),
        }
    }
}

fn wrap_block_error(method: Method, block: &str, error: BlockError) -> Error {
    match error {
        BlockError::Nested(inner) => match *inner {
            Error::BlockMethod(e) => e.within(block).into(),
            Error::Cleanup(e) => Error::Cleanup(CleanupError {
                failures: e
                    .failures
                    .into_iter()
                    .map(|(b, m)| (format!("{}.{}", block, b), m))
                    .collect(),
            }),
            other => BlockMethodError::new(method, block, other.to_string()).into(),
        },
        other => BlockMethodError::new(method, block, other.to_string()).into(),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Resolved positions of a connection
#[derive(Debug, Clone, Copy)]
struct Endpoints {
    source: usize,
    output: usize,
    target: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Assembled,
    Initialized,
    Finished,
}

/// An assembled graph of blocks and its scheduler state
pub struct Model {
    name: String,
    model_name: String,
    nodes: Vec<Node>,
    by_name: HashMap<String, usize>,
    connections: Vec<Connection>,
    endpoints: Vec<Endpoints>,
    by_public: HashMap<String, usize>,
    outgoing: Vec<Vec<usize>>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_stubs: HashMap<String, usize>,
    queue: VecDeque<usize>,
    stats: Option<ExecutionStats>,
    phase: Phase,
}

impl Model {
    /// Empty model; `name` is the instance name, `model_name` its type
    pub fn new(name: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_name: model_name.into(),
            nodes: Vec::new(),
            by_name: HashMap::new(),
            connections: Vec::new(),
            endpoints: Vec::new(),
            by_public: HashMap::new(),
            outgoing: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_stubs: HashMap::new(),
            queue: VecDeque::new(),
            stats: None,
            phase: Phase::Assembled,
        }
    }

    // ── Construction ────────────────────────────────────────────────────

    /// Add a node; fails on a duplicate name
    pub fn add_node(&mut self, node: Node) -> Result<usize, SemanticError> {
        if self.by_name.contains_key(&node.name) {
            return Err(SemanticError::at(
                format!("duplicate block name {:?}", node.name),
                node.location.clone(),
            ));
        }
        let index = self.nodes.len();
        if let NodeKind::InputPort(port) = &node.kind {
            self.input_stubs.insert(port.clone(), index);
        }
        self.by_name.insert(node.name.clone(), index);
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        Ok(index)
    }

    /// Add a connection; endpoints must exist and the public name must be free
    pub fn connect(&mut self, connection: Connection) -> Result<(), SemanticError> {
        if self.by_public.contains_key(&connection.public_name) {
            return Err(SemanticError::new(format!(
                "signal name {:?} is already used",
                connection.public_name
            )));
        }
        let source = self.node_index(&connection.source_block)?;
        let output = self.nodes[source]
            .io
            .outputs()
            .position(connection.source_output.as_str().into())
            .ok_or_else(|| {
                SemanticError::new(format!(
                    "block {:?} has no output {:?}",
                    connection.source_block, connection.source_output
                ))
            })?;
        let target = match (&connection.target_block, &connection.target_input) {
            (Some(block), Some(input)) => {
                let target = self.node_index(block)?;
                let position = self.nodes[target]
                    .io
                    .inputs()
                    .position(input.as_str().into())
                    .ok_or_else(|| {
                        SemanticError::new(format!("block {:?} has no input {:?}", block, input))
                    })?;
                Some((target, position))
            }
            _ => None,
        };

        let index = self.connections.len();
        self.by_public.insert(connection.public_name.clone(), index);
        self.outgoing[source].push(index);
        self.endpoints.push(Endpoints {
            source,
            output,
            target,
        });
        self.connections.push(connection);
        Ok(())
    }

    fn node_index(&self, name: &str) -> Result<usize, SemanticError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SemanticError::new(format!("unknown block {:?}", name)))
    }

    /// Declare a public input; its stub must already be added
    pub fn declare_input(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.inputs.contains(&name) {
            self.inputs.push(name);
        }
    }

    /// Declare a public output
    pub fn declare_output(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
    }

    /// Turn on statistics with a ring of `window` samples
    pub fn enable_stats(&mut self, window: usize) {
        self.stats = Some(ExecutionStats::new(window));
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the model
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Declared public inputs, in declaration order
    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    /// Declared public outputs, in declaration order
    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    /// Public signal names, in connection order
    pub fn public_signals(&self) -> Vec<&str> {
        self.connections
            .iter()
            .map(|c| c.public_name.as_str())
            .collect()
    }

    /// Current source slot of a public signal
    pub fn signal(&self, public_name: &str) -> Option<&Slot> {
        let index = *self.by_public.get(public_name)?;
        let ends = self.endpoints[index];
        Some(self.nodes[ends.source].io.outputs().slot(ends.output))
    }

    /// Connection behind a public signal
    pub fn connection(&self, public_name: &str) -> Option<&Connection> {
        self.by_public
            .get(public_name)
            .map(|&index| &self.connections[index])
    }

    /// All connections, in insertion order
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Names of the regular blocks, in insertion order
    pub fn block_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.kind.is_port())
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Every node, port stubs included
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    /// Number of completed `update()` calls of a block
    pub fn update_count(&self, block: &str) -> usize {
        self.node(block).map(|n| n.updates).unwrap_or(0)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Call `init()` on every node in insertion order, then fill the queue
    pub fn init_blocks(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Assembled {
            return Err(self.lifecycle("init() called twice"));
        }
        self.phase = Phase::Initialized;
        for node in &mut self.nodes {
            node.init_called = true;
            node.call(Method::Init, |block, io| block.init(io))?;
        }
        self.reset_execution();
        tracing::debug!(model = %self.name, blocks = self.nodes.len(), "model initialized");
        Ok(())
    }

    /// Seed the queue with constants and child models that have work
    fn reset_execution(&mut self) {
        self.queue.clear();
        for (index, node) in self.nodes.iter().enumerate() {
            if matches!(node.kind, NodeKind::InputPort(_)) {
                continue;
            }
            if node.block.has_pending_work()
                || (!node.generator && node.io.num_inputs() == 0)
            {
                self.queue.push_back(index);
            }
        }
    }

    /// Push a value into a public input from outside
    pub fn push_input(&mut self, name: &str, value: Value, timestamp: Timestamp) -> Result<(), Error> {
        let index = *self
            .input_stubs
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownSignal {
                model: self.name.clone(),
                signal: name.to_string(),
            })?;
        self.nodes[index]
            .io
            .set_output(0usize, value, Some(timestamp))
            .map_err(|e| RuntimeError::InvalidSample {
                model: self.name.clone(),
                signal: name.to_string(),
                message: e.to_string(),
            })?;
        if !self.queue.contains(&index) {
            self.queue.push_back(index);
        }
        Ok(())
    }

    /// Forward inputs that changed on the enclosing I/O to the stubs
    fn sync_inputs(&mut self, io: &mut BlockIo) -> Result<(), Error> {
        for name in self.inputs.clone() {
            let fresh = io
                .input_update_available(&name)
                .map_err(|e| self.sample_error(&name, e))?;
            if !fresh {
                continue;
            }
            let slot = io
                .input_slot(&name)
                .cloned()
                .unwrap_or_default();
            if let Some(timestamp) = slot.timestamp {
                self.push_input(&name, slot.value, timestamp)?;
            }
        }
        Ok(())
    }

    /// Whether another `step()` would find work
    pub fn has_more(&mut self) -> Result<bool, Error> {
        if !self.queue.is_empty() || self.nodes.iter().any(|n| n.block.has_pending_work()) {
            return Ok(true);
        }
        Ok(self.next_generator()?.is_some())
    }

    /// Generator with the smallest known next timestamp; unknown ones last
    fn next_generator(&mut self) -> Result<Option<usize>, Error> {
        let mut best: Option<(usize, Option<Timestamp>)> = None;
        for index in 0..self.nodes.len() {
            if !self.nodes[index].generator {
                continue;
            }
            let status = self.nodes[index].call(Method::NextDataStatus, |block, _| {
                block.next_data_status()
            })?;
            let DataStatus::HasNext(timestamp) = status else {
                continue;
            };
            let better = match (&best, timestamp) {
                (None, _) => true,
                (Some((_, Some(current))), Some(candidate)) => candidate < *current,
                (Some((_, None)), Some(_)) => true,
                (Some(_), None) => false,
            };
            if better {
                best = Some((index, timestamp));
            }
        }
        Ok(best.map(|(index, _)| index))
    }

    /// Run one scheduling step
    ///
    /// `io` is the enclosing I/O on which values reaching output stubs are
    /// surfaced. Returns `NotFinished` while the queue still holds work.
    pub fn step(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, Error> {
        if self.phase != Phase::Initialized {
            return Err(self.lifecycle("update() called outside of init()/finish()"));
        }
        let next = match self.queue.pop_front().or_else(|| self.pending_child()) {
            Some(index) => Some(index),
            None => self.next_generator()?,
        };
        let index = next.ok_or_else(|| RuntimeError::NoWork(self.name.clone()))?;

        let timer = self.stats.as_ref().map(|_| Timer::start());
        let node = &mut self.nodes[index];
        tracing::trace!(model = %self.name, block = %node.name, "update");
        let status = node.call(Method::Update, |block, io| block.update(io))?;
        node.updates += 1;

        if let (Some(stats), Some(timer)) = (self.stats.as_mut(), timer) {
            let (cpu, wall) = timer.stop();
            let node = &self.nodes[index];
            stats.record_update(&node.name, cpu, wall, logical_timestamp(&node.io));
        }

        if status == UpdateStatus::NotFinished {
            self.queue.push_front(index);
            return Ok(UpdateStatus::NotFinished);
        }

        self.propagate(index, io)?;
        Ok(if self.queue.is_empty() {
            UpdateStatus::Done
        } else {
            UpdateStatus::NotFinished
        })
    }

    fn pending_child(&self) -> Option<usize> {
        self.nodes.iter().position(|n| n.block.has_pending_work())
    }

    /// Copy strictly newer outputs of `source` to its destinations
    fn propagate(&mut self, source: usize, io: &mut BlockIo) -> Result<(), Error> {
        for position in 0..self.outgoing[source].len() {
            let connection = self.outgoing[source][position];
            let ends = self.endpoints[connection];
            let Some((target, input)) = ends.target else {
                continue;
            };
            let slot = self.nodes[source].io.outputs().slot(ends.output);
            let Some(timestamp) = slot.timestamp else {
                continue;
            };
            let stale = self.nodes[target]
                .io
                .inputs()
                .slot(input)
                .timestamp
                .map_or(true, |current| current < timestamp);
            if !stale {
                continue;
            }

            let value = slot.value.clone();
            if let Some(stats) = self.stats.as_mut() {
                let public = &self.connections[connection].public_name;
                stats.record_edge(
                    public,
                    &self.nodes[source].name,
                    Some(&self.nodes[target].name),
                    timestamp,
                    || serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0),
                );
            }
            if let NodeKind::OutputPort(port) = &self.nodes[target].kind {
                io.set_output(port.as_str(), value.clone(), Some(timestamp))
                    .map_err(|e| BlockMethodError::new(Method::Update, &self.name, e.to_string()))?;
            }
            self.nodes[target]
                .io
                .set_input(input, value, timestamp)
                .map_err(|e| BlockMethodError::new(Method::Update, &self.name, e.to_string()))?;
            if !self.queue.contains(&target) {
                self.queue.push_back(target);
            }
        }
        Ok(())
    }

    /// Call `finish()` on every node; stops at the first failure
    pub fn finish_blocks(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Initialized {
            return Err(self.lifecycle("finish() called before init()"));
        }
        self.phase = Phase::Finished;
        for node in &mut self.nodes {
            node.call(Method::Finish, |block, io| block.finish(io))?;
        }
        Ok(())
    }

    /// Call `cleanup()` once on every initialized node, collecting all failures
    pub fn cleanup_blocks(&mut self) -> Result<(), CleanupError> {
        let mut failures = Vec::new();
        for node in &mut self.nodes {
            if node.cleaned || !node.init_called {
                continue;
            }
            node.cleaned = true;
            match node.call(Method::Cleanup, |block, _| block.cleanup()) {
                Ok(()) => {}
                Err(Error::Cleanup(nested)) => failures.extend(nested.failures),
                Err(Error::BlockMethod(e)) => failures.push((e.chain.join("."), e.message)),
                Err(other) => failures.push((node.name.clone(), other.to_string())),
            }
        }
        self.queue.clear();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { failures })
        }
    }

    /// Whether `init()` was called on at least one node
    pub fn was_initialized(&self) -> bool {
        self.nodes.iter().any(|n| n.init_called)
    }

    /// Statistics of this model and its nested models
    pub fn report(&self) -> Option<StatsReport> {
        let mut report = self.stats.as_ref()?.report();
        for node in &self.nodes {
            if let Some(nested) = node.block.stats_report() {
                report.absorb(&node.name, nested);
            }
        }
        Some(report)
    }

    fn lifecycle(&self, message: &str) -> Error {
        RuntimeError::Lifecycle {
            model: self.name.clone(),
            message: message.to_string(),
        }
        .into()
    }

    fn sample_error(&self, signal: &str, error: BlockError) -> Error {
        RuntimeError::InvalidSample {
            model: self.name.clone(),
            signal: signal.to_string(),
            message: error.to_string(),
        }
        .into()
    }
}

/// Timestamp a stats sample is attributed to
fn logical_timestamp(io: &BlockIo) -> Timestamp {
    io.inputs()
        .max_timestamp()
        .or_else(|| io.outputs().max_timestamp())
        .unwrap_or(Timestamp::ETERNITY)
}

impl Block for Model {
    fn init(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(self.init_blocks()?)
    }

    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        self.sync_inputs(io)?;
        Ok(self.step(io)?)
    }

    fn finish(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(self.finish_blocks()?)
    }

    fn cleanup(&mut self) -> Result<(), BlockError> {
        self.cleanup_blocks()
            .map_err(|e| BlockError::from(Error::Cleanup(e)))
    }

    fn is_generator(&self) -> bool {
        true
    }

    /// Earliest known next timestamp over the inner generators
    fn next_data_status(&mut self) -> Result<DataStatus, BlockError> {
        let mut any = false;
        let mut earliest: Option<Timestamp> = None;
        for index in 0..self.nodes.len() {
            if !self.nodes[index].generator {
                continue;
            }
            let status = self.nodes[index].call(Method::NextDataStatus, |block, _| {
                block.next_data_status()
            })?;
            if let DataStatus::HasNext(timestamp) = status {
                any = true;
                if let Some(ts) = timestamp {
                    earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
                }
            }
        }
        Ok(if any {
            DataStatus::HasNext(earliest)
        } else {
            DataStatus::NoMore
        })
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || self.nodes.iter().any(|n| n.block.has_pending_work())
    }

    fn stats_report(&self) -> Option<StatsReport> {
        self.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigMap;
    use crate::runtime::ports::{InputPort, OutputPort};
    use serde_json::json;

    struct Double;

    impl Block for Double {
        fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
            let x = io.input("x")?.as_f64().unwrap_or(0.0);
            io.set_output("y", x * 2.0, None)?;
            Ok(UpdateStatus::Done)
        }
    }

    fn io(name: &str, inputs: &[&str], outputs: &[&str]) -> BlockIo {
        BlockIo::new(
            name,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
            ConfigMap::new(),
        )
        .unwrap()
    }

    fn doubler() -> Model {
        let mut model = Model::new("m", "m");
        let stub = Node::new("input", NodeKind::InputPort("x".into()), Box::new(InputPort), io("in(x)", &[], &["x"]), None);
        let block = Node::new("double", NodeKind::Block, Box::new(Double), io("d", &["x"], &["y"]), None);
        let out = Node::new("output", NodeKind::OutputPort("y".into()), Box::new(OutputPort), io("out(y)", &["y"], &[]), None);
        model.add_node(stub).unwrap();
        model.add_node(block).unwrap();
        model.add_node(out).unwrap();
        model.connect(Connection::new("x", "in(x)", "x", "d", "x")).unwrap();
        model.connect(Connection::new("y", "d", "y", "out(y)", "y")).unwrap();
        model.declare_input("x");
        model.declare_output("y");
        model
    }

    #[test]
    fn test_push_and_step() {
        let mut model = doubler();
        let mut outer = io("m", &["x"], &["y"]);
        model.init_blocks().unwrap();
        assert!(!model.has_more().unwrap());

        model.push_input("x", json!(3.0), Timestamp::new(1.0)).unwrap();
        while model.has_more().unwrap() {
            model.step(&mut outer).unwrap();
        }
        let out = outer.output_slot("y").unwrap();
        assert_eq!(out.value, json!(6.0));
        assert_eq!(out.timestamp, Some(Timestamp::new(1.0)));
        assert_eq!(model.update_count("d"), 1);
        assert_eq!(model.signal("y").unwrap().value, json!(6.0));
    }

    #[test]
    fn test_step_without_work_fails() {
        let mut model = doubler();
        let mut outer = io("m", &["x"], &["y"]);
        model.init_blocks().unwrap();
        let err = model.step(&mut outer).unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::NoWork(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = doubler();
        let again = Node::new("double", NodeKind::Block, Box::new(Double), io("d", &["x"], &["y"]), None);
        assert!(model.add_node(again).is_err());
        assert!(model.connect(Connection::new("x", "d", "y", "out(y)", "y")).is_err());
        assert!(model.connect(Connection::new("z", "d", "nope", "out(y)", "y")).is_err());
    }

    #[test]
    fn test_unknown_input_is_a_runtime_error() {
        let mut model = doubler();
        model.init_blocks().unwrap();
        let err = model.push_input("nope", json!(1), Timestamp::new(0.0)).unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::UnknownSignal { .. })));
    }

    #[test]
    fn test_panics_are_trapped() {
        struct Boom;
        impl Block for Boom {
            fn update(&mut self, _io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
                panic!("kaboom")
            }
        }
        let mut model = Model::new("m", "m");
        model
            .add_node(Node::new("boom", NodeKind::Block, Box::new(Boom), io("b", &[], &[]), None))
            .unwrap();
        model.init_blocks().unwrap();
        let err = model.step(&mut io("m", &[], &[])).unwrap_err();
        match err {
            Error::BlockMethod(e) => {
                assert_eq!(e.block(), "b");
                assert_eq!(e.method, Method::Update);
                assert!(e.message.contains("kaboom"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(model.cleanup_blocks().is_ok());
    }
}
