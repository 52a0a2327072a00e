//! Model assembler
//!
//! Turns a [`ParsedModel`] into a runnable [`Model`]:
//! 1. model config and assignments become variables; dotted keys become
//!    properties of the named block
//! 2. imports are handed to the registry
//! 3. each connection is walked left to right, instancing blocks through the
//!    registry, naming anonymous blocks and signals, and wiring edges
//! 4. the result is validated before it is returned
//!
//! Every failure is a [`SemanticError`] pointing at the offending element.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::core::block::{BlockIo, IoSpec};
use crate::core::config::ConfigMap;
use crate::core::registry::Registry;
use crate::core::signal::{Connection, Value};
use crate::error::{Error, SemanticError};
use crate::lang::ast::{BlockKind, BlockRef, ConnectionStmt, Element, Literal, LocalName, PortRef, SignalList};
use crate::lang::{Location, ParsedModel};

use super::model::{Model, Node};
use super::ports::{stub_name, unique_name, InputPort, NodeKind, OutputPort};
use super::validation::GraphValidator;

/// Assemble `parsed` into a model instance called `name`
pub fn assemble(
    parsed: &ParsedModel,
    name: &str,
    config: &ConfigMap,
    registry: &Registry,
) -> Result<Model, Error> {
    Assembler::new(parsed, name, registry).run(config)
}

/// Public inputs of a model: declared ones, then undeclared input ports
pub fn model_inputs(parsed: &ParsedModel) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let declared = parsed.inputs.iter().map(|i| &i.name);
    let ports = parsed.input_ports().into_iter().map(|p| &p.name);
    for name in declared.chain(ports) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

/// Public outputs of a model: declared ones, then undeclared output ports
pub fn model_outputs(parsed: &ParsedModel) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let declared = parsed.outputs.iter().map(|o| &o.name);
    let ports = parsed.output_ports().into_iter().map(|p| &p.name);
    for name in declared.chain(ports) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

fn semantic(message: impl Into<String>, location: &Location) -> Error {
    SemanticError::at(message, Some(location.clone())).into()
}

fn locate(error: Error, location: &Location) -> Error {
    match error {
        Error::Semantic(e) => Error::Semantic(e.or_at(Some(location))),
        other => other,
    }
}

fn listing(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn canonical(names: &[String], local: &LocalName) -> Option<String> {
    match local {
        LocalName::Index(i) => names.get(*i).cloned(),
        LocalName::Name(name) => names.iter().find(|n| *n == name).cloned(),
    }
}

// ── Signal lists ────────────────────────────────────────────────────────────

/// A signal of a link, before and after resolution of its local names
#[derive(Debug, Clone)]
struct LinkSignal {
    /// `None` for signals of an anonymous link
    name: Option<String>,
    block: Option<String>,
    local_input: Option<LocalName>,
    local_output: Option<LocalName>,
    location: Location,
}

impl fmt::Display for LinkSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local_input {
            write!(f, "[{}]", local)?;
        }
        if let Some(block) = &self.block {
            write!(f, "{}.", block)?;
        }
        write!(f, "{}", self.name.as_deref().unwrap_or("_"))?;
        if let Some(local) = &self.local_output {
            write!(f, "[{}]", local)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Link {
    signals: Vec<LinkSignal>,
    location: Location,
}

impl Link {
    fn parsed(list: &SignalList) -> Self {
        Self {
            signals: list
                .signals
                .iter()
                .map(|s| LinkSignal {
                    name: Some(s.name.clone()),
                    block: s.block.clone(),
                    local_input: s.local_input.clone(),
                    local_output: s.local_output.clone(),
                    location: s.location.clone(),
                })
                .collect(),
            location: list.location.clone(),
        }
    }

    /// All outputs of the upstream block, in order
    fn anonymous(outputs: &[String], location: &Location) -> Self {
        Self {
            signals: outputs
                .iter()
                .map(|output| LinkSignal {
                    name: None,
                    block: None,
                    local_input: Some(LocalName::Name(output.clone())),
                    local_output: None,
                    location: location.clone(),
                })
                .collect(),
            location: location.clone(),
        }
    }
}

/// Input names of a node given its declaration and the link feeding it
fn define_inputs(
    spec: &IoSpec,
    config: &ConfigMap,
    link: Option<&Link>,
    block: &str,
    location: &Location,
) -> Result<Vec<String>, Error> {
    let given = link.map(|l| l.signals.len());
    let names = match spec {
        IoSpec::Variable { min, max } => {
            let max = max.unwrap_or(usize::MAX);
            let Some(link) = link else {
                if *min > 0 {
                    return Err(semantic(
                        format!(
                            "block {:?} expects at least {} input signal(s) but is not connected to anything",
                            block, min
                        ),
                        location,
                    ));
                }
                return Ok(Vec::new());
            };
            let count = link.signals.len();
            if count < *min || count > max {
                let range = if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("between {} and {}", min, max)
                };
                return Err(semantic(
                    format!("block {:?} expects {} input signals, got {}", block, range, count),
                    &link.location,
                ));
            }
            let mut names: Vec<String> = Vec::new();
            for signal in &link.signals {
                let base = match (&signal.local_output, &signal.name, &signal.local_input) {
                    (Some(local), _, _) => local.to_string(),
                    (None, Some(name), _) => name.clone(),
                    (None, None, Some(local)) => local.to_string(),
                    (None, None, None) => "in".to_string(),
                };
                let name = unique_name(&base, |n| names.iter().any(|m| m == n));
                names.push(name);
            }
            return Ok(names);
        }
        IoSpec::Fixed(decls) => decls.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
        IoSpec::DefinedAtRuntime(compute) => {
            let names = compute(config).map_err(|e| {
                semantic(format!("block {:?} cannot name its inputs: {}", block, e), location)
            })?;
            check_unique(&names, block, location)?;
            names
        }
    };

    match given {
        None if !names.is_empty() => Err(semantic(
            format!(
                "block {:?} expects {} input signal(s) but none were given",
                block,
                names.len()
            ),
            location,
        )),
        Some(count) if count != names.len() => Err(semantic(
            format!(
                "block {:?} expects {} input signal(s), got {}",
                block,
                names.len(),
                count
            ),
            link.map(|l| &l.location).unwrap_or(location),
        )),
        _ => Ok(names),
    }
}

/// Output names of a node once its inputs are known
fn define_outputs(
    spec: &IoSpec,
    config: &ConfigMap,
    inputs: &[String],
    block: &str,
    location: &Location,
) -> Result<Vec<String>, Error> {
    match spec {
        IoSpec::Fixed(decls) => Ok(decls.iter().map(|d| d.name.clone()).collect()),
        IoSpec::Variable { .. } => Ok(inputs.to_vec()),
        IoSpec::DefinedAtRuntime(compute) => {
            let names = compute(config).map_err(|e| {
                semantic(format!("block {:?} cannot name its outputs: {}", block, e), location)
            })?;
            check_unique(&names, block, location)?;
            Ok(names)
        }
    }
}

fn check_unique(names: &[String], block: &str, location: &Location) -> Result<(), Error> {
    let mut seen = HashSet::new();
    match names.iter().find(|n| !seen.insert(n.as_str())) {
        Some(dup) => Err(semantic(
            format!("block {:?} repeats signal name {:?}", block, dup),
            location,
        )),
        None => Ok(()),
    }
}

// ── Variables ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Property {
    Pending(Literal),
    Resolving,
    Resolved(Value),
}

/// Model variables, resolved lazily so definitions may come in any order
#[derive(Debug, Default)]
struct Scope {
    properties: BTreeMap<String, (Property, Location)>,
    used: HashSet<String>,
}

impl Scope {
    fn define(&mut self, name: &str, value: Literal, location: Location) {
        self.properties
            .insert(name.to_string(), (Property::Pending(value), location));
    }

    /// Value of `$name`: model variables first, then the environment
    fn lookup(&mut self, name: &str, at: &Location) -> Result<Value, Error> {
        self.used.insert(name.to_string());
        let Some(entry) = self.properties.get_mut(name) else {
            if let Ok(value) = std::env::var(name) {
                return Ok(Value::String(value));
            }
            let known: Vec<String> = self.properties.keys().cloned().collect();
            return Err(semantic(
                format!("unknown variable ${}; known variables: {}", name, listing(&known)),
                at,
            ));
        };

        let literal = match std::mem::replace(&mut entry.0, Property::Resolving) {
            Property::Resolved(value) => {
                entry.0 = Property::Resolved(value.clone());
                return Ok(value);
            }
            Property::Resolving => {
                return Err(semantic(
                    format!("variable ${} is defined in terms of itself", name),
                    at,
                ))
            }
            Property::Pending(literal) => literal,
        };
        let location = entry.1.clone();
        let value = self.expand(&literal, &location)?;
        if let Some(entry) = self.properties.get_mut(name) {
            entry.0 = Property::Resolved(value.clone());
        }
        Ok(value)
    }

    /// Substitute every reference inside a literal
    fn expand(&mut self, literal: &Literal, at: &Location) -> Result<Value, Error> {
        match literal {
            Literal::Ref(name) => self.lookup(name, at),
            Literal::Str(s) => Ok(Value::String(self.expand_string(s, at)?)),
            Literal::List(items) => items
                .iter()
                .map(|item| self.expand(item, at))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Literal::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.expand(value, at)?);
                }
                Ok(Value::Object(map))
            }
            other => Ok(other.to_value().unwrap_or(Value::Null)),
        }
    }

    /// Replace `${name}` occurrences; other `$` characters are kept
    fn expand_string(&mut self, s: &str, at: &Location) -> Result<String, Error> {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end)
                    if end > 0
                        && after[..end].chars().all(|c| c.is_alphanumeric() || c == '_') =>
                {
                    out.push_str(&rest[..start]);
                    match self.lookup(&after[..end], at)? {
                        Value::String(text) => out.push_str(&text),
                        other => out.push_str(&other.to_string()),
                    }
                    rest = &after[end + 1..];
                }
                _ => {
                    out.push_str(&rest[..start + 2]);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn unused(&self) -> Vec<String> {
        self.properties
            .keys()
            .filter(|k| !self.used.contains(*k))
            .cloned()
            .collect()
    }
}

// ── Assembler ───────────────────────────────────────────────────────────────

struct Assembler<'a> {
    parsed: &'a ParsedModel,
    registry: &'a Registry,
    model: Model,
    scope: Scope,
    /// `block -> property -> value`, from dotted keys
    block_properties: BTreeMap<String, BTreeMap<String, Literal>>,
    /// Blocks named by dotted keys, checked once all blocks exist
    referenced: Vec<(String, Location)>,
}

impl<'a> Assembler<'a> {
    fn new(parsed: &'a ParsedModel, name: &str, registry: &'a Registry) -> Self {
        let model_name = parsed.name.clone().unwrap_or_else(|| name.to_string());
        Self {
            parsed,
            registry,
            model: Model::new(name, model_name),
            scope: Scope::default(),
            block_properties: BTreeMap::new(),
            referenced: Vec::new(),
        }
    }

    fn run(mut self, config: &ConfigMap) -> Result<Model, Error> {
        let parsed = self.parsed;
        let settings = self.registry.settings().clone();
        tracing::debug!(model = %self.model.model_name(), instance = %self.model.name(), "assembling model");

        if settings.stats {
            self.model.enable_stats(settings.stats_window);
        }
        for input in model_inputs(parsed) {
            self.model.declare_input(input);
        }
        for output in model_outputs(parsed) {
            self.model.declare_output(output);
        }
        self.check_ports(settings.strict_io)?;

        self.read_config(config, settings.strict_config)?;
        self.read_assignments()?;
        self.route_nested_config(config);
        self.import_packages()?;

        for connection in &parsed.connections {
            self.connect(connection)?;
        }

        self.check_referenced_blocks()?;
        self.check_unused(settings.strict_config)?;
        self.add_dummy_inputs()?;

        GraphValidator::validate(&self.model).into_result(self.model.name())?;
        Ok(self.model)
    }

    // ── Config and variables ────────────────────────────────────────────

    fn check_ports(&self, strict: bool) -> Result<(), Error> {
        let parsed = self.parsed;
        let undeclared = parsed
            .input_ports()
            .into_iter()
            .filter(|p| !parsed.inputs.iter().any(|i| i.name == p.name))
            .map(|p| ("input", p))
            .chain(
                parsed
                    .output_ports()
                    .into_iter()
                    .filter(|p| !parsed.outputs.iter().any(|o| o.name == p.name))
                    .map(|p| ("output", p)),
            );
        let mut warned = HashSet::new();
        for (what, port) in undeclared {
            let message = format!("port ({}) is used without `{} {}`", port.name, what, port.name);
            if strict {
                return Err(semantic(message, &port.location));
            }
            if warned.insert((what, &port.name)) {
                tracing::warn!(model = %self.model.model_name(), at = %port.location, "{}", message);
            }
        }
        Ok(())
    }

    /// Model config: passed values win over defaults
    fn read_config(&mut self, config: &ConfigMap, strict: bool) -> Result<(), Error> {
        let parsed = self.parsed;
        for key in config.keys().filter(|k| !k.contains('.')) {
            if parsed.configs.iter().any(|c| &c.name == key) {
                continue;
            }
            let known: Vec<String> = parsed.configs.iter().map(|c| c.name.clone()).collect();
            let message = format!(
                "unknown config {:?} for model {:?}; known config: {}",
                key,
                self.model.model_name(),
                listing(&known)
            );
            if strict {
                return Err(semantic(message, &parsed.location));
            }
            tracing::warn!(model = %self.model.model_name(), "{}", message);
        }

        for decl in &parsed.configs {
            let value = match (config.get(&decl.name), &decl.default) {
                (Some(passed), _) => Literal::from(passed),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(semantic(
                        format!(
                            "model {:?} requires config {:?}",
                            self.model.model_name(),
                            decl.name
                        ),
                        &decl.location,
                    ))
                }
            };
            self.scope.define(&decl.name, value, decl.location.clone());
        }
        Ok(())
    }

    fn read_assignments(&mut self) -> Result<(), Error> {
        let parsed = self.parsed;
        for assignment in &parsed.assignments {
            if let Some((block, property)) = assignment.key.split_once('.') {
                self.set_block_property(block, property, assignment.value.clone(), &assignment.location);
                continue;
            }
            if parsed.configs.iter().any(|c| c.name == assignment.key) {
                return Err(semantic(
                    format!(
                        "assignment to {:?} overwrites a config variable; change its default instead",
                        assignment.key
                    ),
                    &assignment.location,
                ));
            }
            self.scope.define(
                &assignment.key,
                assignment.value.clone(),
                assignment.location.clone(),
            );
        }
        Ok(())
    }

    /// `block.key` config passed from outside; overrides assignments
    fn route_nested_config(&mut self, config: &ConfigMap) {
        let location = self.parsed.location.clone();
        for (key, value) in config {
            if let Some((block, property)) = key.split_once('.') {
                self.set_block_property(block, property, Literal::from(value), &location);
            }
        }
    }

    fn set_block_property(&mut self, block: &str, property: &str, value: Literal, location: &Location) {
        self.block_properties
            .entry(block.to_string())
            .or_default()
            .insert(property.to_string(), value);
        self.referenced.push((block.to_string(), location.clone()));
    }

    fn import_packages(&mut self) -> Result<(), Error> {
        let parsed = self.parsed;
        for import in &parsed.imports {
            tracing::debug!(package = %import.package, "importing");
            self.registry.import(&import.package).map_err(|e| match e {
                Error::Syntax(_) => e,
                other => semantic(
                    format!("cannot import package {:?}: {}", import.package, other),
                    &import.location,
                ),
            })?;
        }
        Ok(())
    }

    // ── Connections ─────────────────────────────────────────────────────

    fn connect(&mut self, connection: &ConnectionStmt) -> Result<(), Error> {
        let last = connection.elements.len().saturating_sub(1);
        let mut previous: Option<String> = None;
        let mut link: Option<Link> = None;

        for (i, element) in connection.elements.iter().enumerate() {
            match element {
                Element::Signals(list) => {
                    if link.is_some() {
                        return Err(semantic("two signal lists in a row", &list.location));
                    }
                    let parsed = Link::parsed(list);
                    if i == last {
                        let Some(source) = previous.as_deref() else {
                            return Err(semantic("a connection needs at least one block", &list.location));
                        };
                        self.terminate(source, parsed)?;
                    } else {
                        link = Some(parsed);
                    }
                }
                Element::Block(block) => {
                    let link = link.take();
                    previous = Some(self.place_block(block, previous.as_deref(), link)?);
                }
                Element::Port(port) if i == 0 => {
                    previous = Some(self.input_stub(&port.name, &port.location)?);
                }
                Element::Port(port) if i == last => {
                    let link = link.take();
                    self.place_output_port(port, previous.as_deref(), link)?;
                }
                Element::Port(port) => {
                    return Err(semantic(
                        format!("port ({}) can only start or end a connection", port.name),
                        &port.location,
                    ));
                }
            }
        }
        Ok(())
    }

    /// The link into the next node, anonymous if none was written
    fn fill_link(
        &self,
        previous: Option<&str>,
        link: Option<Link>,
        location: &Location,
    ) -> Result<Option<Link>, Error> {
        let Some(previous) = previous else {
            return Ok(link);
        };
        let outputs = self.outputs_of(previous);
        if outputs.is_empty() {
            return Err(semantic(
                format!(
                    "block {:?} has no outputs, yet it is not the last in the connection",
                    previous
                ),
                location,
            ));
        }
        Ok(Some(link.unwrap_or_else(|| Link::anonymous(&outputs, location))))
    }

    fn outputs_of(&self, node: &str) -> Vec<String> {
        self.model
            .node(node)
            .map(|n| n.io().output_names().to_vec())
            .unwrap_or_default()
    }

    fn inputs_of(&self, node: &str) -> Vec<String> {
        self.model
            .node(node)
            .map(|n| n.io().input_names().to_vec())
            .unwrap_or_default()
    }

    fn block_names(&self) -> Vec<String> {
        self.model.block_names().into_iter().map(str::to_string).collect()
    }

    /// Instance one block and wire the link feeding it
    fn place_block(
        &mut self,
        block: &BlockRef,
        previous: Option<&str>,
        link: Option<Link>,
    ) -> Result<String, Error> {
        let location = &block.location;
        let link = self.fill_link(previous, link, location)?;

        let type_name = match &block.kind {
            BlockKind::Name(name) => name.clone(),
            BlockKind::Ref(var) => match self.scope.lookup(var, location)? {
                Value::String(name) => name,
                other => {
                    return Err(semantic(
                        format!("block type ${} must be a string, got {}", var, other),
                        location,
                    ))
                }
            },
        };
        let factory = self
            .registry
            .get_factory(&type_name)
            .map_err(|e| semantic(e.to_string(), location))?;

        let name = match &block.name {
            Some(name) => {
                if self.model.node(name).is_some() {
                    return Err(semantic(format!("duplicate block name {:?}", name), location));
                }
                name.clone()
            }
            None => unique_name(&type_name, |n| self.model.node(n).is_some()),
        };

        let passed = self.block_config(&name, block)?;
        let config = factory
            .resolve_config(&passed, self.registry.settings())
            .map_err(|e| semantic(format!("block {:?}: {}", name, e), location))?;
        let spec = factory.spec();
        let inputs = define_inputs(&spec.inputs, &config, link.as_ref(), &name, location)?;
        let outputs = define_outputs(&spec.outputs, &config, &inputs, &name, location)?;

        tracing::debug!(block = %name, kind = %type_name, "instancing block");
        let instance = factory
            .instance(&name, &config, self.registry)
            .map_err(|e| locate(e, location))?;
        let io = BlockIo::new(&name, inputs, outputs, config).map_err(|dup| {
            semantic(format!("block {:?} repeats signal name {:?}", name, dup), location)
        })?;
        self.model.add_node(Node::new(
            type_name,
            NodeKind::Block,
            instance,
            io,
            Some(location.clone()),
        ))?;

        if let Some(link) = link {
            self.wire(previous, &name, link)?;
        }
        Ok(name)
    }

    /// Inline config overlaid with dotted properties, references expanded
    fn block_config(&mut self, name: &str, block: &BlockRef) -> Result<ConfigMap, Error> {
        let mut literals: BTreeMap<String, Literal> = block.config.iter().cloned().collect();
        if let Some(properties) = self.block_properties.get(name) {
            literals.extend(properties.clone());
        }
        let mut config = ConfigMap::new();
        for (key, literal) in literals {
            let value = self.scope.expand(&literal, &block.location)?;
            config.insert(key, value);
        }
        Ok(config)
    }

    /// Stub behind a model input, created on first use
    fn input_stub(&mut self, port: &str, location: &Location) -> Result<String, Error> {
        let kind = NodeKind::InputPort(port.to_string());
        if let Some(node) = self.model.nodes().iter().find(|n| n.kind == kind) {
            return Ok(node.name.clone());
        }
        let name = stub_name(&kind, |n| self.model.node(n).is_some());
        let io = BlockIo::new(&name, Vec::new(), vec![port.to_string()], ConfigMap::new())
            .map_err(|dup| semantic(format!("duplicate signal {:?}", dup), location))?;
        self.model.add_node(Node::new(
            "input",
            kind,
            Box::new(InputPort),
            io,
            Some(location.clone()),
        ))?;
        Ok(name)
    }

    fn place_output_port(
        &mut self,
        port: &PortRef,
        previous: Option<&str>,
        link: Option<Link>,
    ) -> Result<(), Error> {
        let location = &port.location;
        let kind = NodeKind::OutputPort(port.name.clone());
        if self.model.nodes().iter().any(|n| n.kind == kind) {
            return Err(semantic(
                format!("output port ({}) is fed more than once", port.name),
                location,
            ));
        }
        let link = self.fill_link(previous, link, location)?;
        let label = format!("({})", port.name);
        let inputs = define_inputs(
            &IoSpec::fixed([port.name.clone()]),
            &ConfigMap::new(),
            link.as_ref(),
            &label,
            location,
        )?;
        let name = stub_name(&kind, |n| self.model.node(n).is_some());
        let io = BlockIo::new(&name, inputs, Vec::new(), ConfigMap::new())
            .map_err(|dup| semantic(format!("duplicate signal {:?}", dup), location))?;
        self.model.add_node(Node::new(
            "output",
            kind,
            Box::new(OutputPort),
            io,
            Some(location.clone()),
        ))?;
        if let Some(link) = link {
            self.wire(previous, &name, link)?;
        }
        Ok(())
    }

    fn unique_public(&self, base: &str) -> String {
        unique_name(base, |n| self.model.connection(n).is_some())
    }

    /// Connect the signals of `link` into `target`
    fn wire(&mut self, previous: Option<&str>, target: &str, link: Link) -> Result<(), Error> {
        let target_inputs = self.inputs_of(target);
        let mut inputs = Vec::with_capacity(link.signals.len());
        for (i, signal) in link.signals.iter().enumerate() {
            let local = signal.local_output.clone().unwrap_or(LocalName::Index(i));
            let input = canonical(&target_inputs, &local).ok_or_else(|| {
                semantic(
                    format!(
                        "block {:?} has no input {:?}; inputs: {}",
                        target,
                        local.to_string(),
                        listing(&target_inputs)
                    ),
                    &signal.location,
                )
            })?;
            inputs.push(input);
        }

        match previous {
            Some(source) => self.wire_between(source, target, &link, &inputs),
            None => self.wire_from_signals(target, &link, &inputs),
        }
    }

    fn wire_between(
        &mut self,
        source: &str,
        target: &str,
        link: &Link,
        inputs: &[String],
    ) -> Result<(), Error> {
        let outputs = self.resolve_outputs(source, link)?;
        let kind_of = |name: &str| self.model.node(name).map(|n| n.kind.clone());
        let port = match (kind_of(source), kind_of(target)) {
            (Some(NodeKind::InputPort(port)), _) | (_, Some(NodeKind::OutputPort(port))) => Some(port),
            _ => None,
        };

        for ((signal, output), input) in link.signals.iter().zip(outputs).zip(inputs) {
            let base = match (&signal.name, &port) {
                (Some(name), _) => name.clone(),
                (None, Some(port)) => port.clone(),
                (None, None) => format!("{}:{}:{}", source, output, target),
            };
            let public = self.unique_public(&base);
            self.model
                .connect(Connection::new(public, source, output, target, input))
                .map_err(|e| Error::Semantic(e.or_at(Some(&signal.location))))?;
        }
        Ok(())
    }

    /// First signal list of a connection: names refer to existing signals
    fn wire_from_signals(&mut self, target: &str, link: &Link, inputs: &[String]) -> Result<(), Error> {
        for (signal, input) in link.signals.iter().zip(inputs) {
            if signal.local_input.is_some() {
                return Err(semantic(
                    format!("signal {} uses a local input without a preceding block", signal),
                    &signal.location,
                ));
            }
            let Some(name) = &signal.name else {
                return Err(semantic("unnamed signal without a preceding block", &signal.location));
            };
            let (source, output) = match &signal.block {
                Some(block) => {
                    let outputs = match self.model.node(block) {
                        Some(node) => node.io().output_names().to_vec(),
                        None => {
                            return Err(semantic(
                                format!(
                                    "signal {} refers to unknown block {:?}; known blocks: {}",
                                    signal,
                                    block,
                                    listing(&self.block_names())
                                ),
                                &signal.location,
                            ))
                        }
                    };
                    if !outputs.contains(name) {
                        return Err(semantic(
                            format!(
                                "block {:?} has no output {:?}; outputs: {}",
                                block,
                                name,
                                listing(&outputs)
                            ),
                            &signal.location,
                        ));
                    }
                    (block.clone(), name.clone())
                }
                None => match self.model.connection(name) {
                    Some(connection) => (
                        connection.source_block.clone(),
                        connection.source_output.clone(),
                    ),
                    None => {
                        let known: Vec<String> = self
                            .model
                            .public_signals()
                            .into_iter()
                            .filter(|s| !s.contains(':'))
                            .map(str::to_string)
                            .collect();
                        return Err(semantic(
                            format!("unknown signal {:?}; known signals: {}", name, listing(&known)),
                            &signal.location,
                        ));
                    }
                },
            };

            let public = self.unique_public(&format!("{}:{}:{}", source, output, target));
            self.model
                .connect(Connection::new(public, &source, output, target, input))
                .map_err(|e| Error::Semantic(e.or_at(Some(&signal.location))))?;
        }
        Ok(())
    }

    /// Source outputs named by a link leaving `source`
    fn resolve_outputs(&self, source: &str, link: &Link) -> Result<Vec<String>, Error> {
        let available = self.outputs_of(source);
        if link.signals.len() > available.len() {
            return Err(semantic(
                format!(
                    "{} signal(s) given but block {:?} only has {} output(s)",
                    link.signals.len(),
                    source,
                    available.len()
                ),
                &link.location,
            ));
        }
        link.signals
            .iter()
            .enumerate()
            .map(|(i, signal)| {
                if signal.block.is_some() {
                    return Err(semantic(
                        format!("signal {} cannot name a block when it connects two blocks", signal),
                        &signal.location,
                    ));
                }
                let local = signal.local_input.clone().unwrap_or(LocalName::Index(i));
                canonical(&available, &local).ok_or_else(|| {
                    semantic(
                        format!(
                            "block {:?} has no output {:?}; outputs: {}",
                            source,
                            local.to_string(),
                            listing(&available)
                        ),
                        &signal.location,
                    )
                })
            })
            .collect()
    }

    /// Last signal list of a connection: publish outputs under new names
    fn terminate(&mut self, source: &str, link: Link) -> Result<(), Error> {
        let outputs = self.resolve_outputs(source, &link)?;
        for (signal, output) in link.signals.iter().zip(outputs) {
            if signal.local_output.is_some() {
                return Err(semantic(
                    format!("terminator signal {} cannot have a local output", signal),
                    &signal.location,
                ));
            }
            let name = signal.name.clone().unwrap_or_else(|| output.clone());
            if self.model.connection(&name).is_some() {
                return Err(semantic(
                    format!("public signal name {:?} already taken", name),
                    &signal.location,
                ));
            }
            self.model
                .connect(Connection::terminator(name, source, output))
                .map_err(|e| Error::Semantic(e.or_at(Some(&signal.location))))?;
        }
        Ok(())
    }

    // ── Final checks ────────────────────────────────────────────────────

    fn check_referenced_blocks(&self) -> Result<(), Error> {
        for (block, location) in &self.referenced {
            if self.model.node(block).is_none() {
                return Err(semantic(
                    format!(
                        "property set for unknown block {:?}; known blocks: {}",
                        block,
                        listing(&self.block_names())
                    ),
                    location,
                ));
            }
        }
        Ok(())
    }

    fn check_unused(&mut self, strict: bool) -> Result<(), Error> {
        let unused = self.scope.unused();
        if !unused.is_empty() {
            let message = format!(
                "config or variables set but never read: {}",
                unused.join(", ")
            );
            if strict {
                return Err(semantic(message, &self.parsed.location));
            }
            tracing::warn!(model = %self.model.model_name(), "{}", message);
        }
        // resolve the rest anyway so bad references are still reported
        for name in unused {
            let location = self.parsed.location.clone();
            self.scope.lookup(&name, &location)?;
        }
        Ok(())
    }

    fn add_dummy_inputs(&mut self) -> Result<(), Error> {
        let location = self.parsed.location.clone();
        for input in self.model.input_names().to_vec() {
            self.input_stub(&input, &location)?;
        }
        Ok(())
    }
}
