//! Graph validation
//!
//! Re-checks an assembled [`Model`] before it runs: input arity, unused
//! outputs, unproduced public outputs, feedback loops and isolated blocks.
//! Produces a `GraphValidationResult`; errors make assembly fail, warnings
//! are logged.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::SemanticError;

use super::model::Model;
use super::ports::NodeKind;

// ── Result types ────────────────────────────────────────────────────────────

/// A single validation error with optional location and suggestion.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Block where the problem was found (if applicable).
    pub block: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Optional suggestion for how to fix it.
    pub suggestion: Option<String>,
}

/// A non-fatal warning.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub block: Option<String>,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Overall validation result
#[derive(Debug, Clone)]
pub struct GraphValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl GraphValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(&mut self, block: Option<&str>, message: impl Into<String>, suggestion: Option<&str>) {
        self.valid = false;
        self.errors.push(ValidationError {
            block: block.map(|s| s.to_string()),
            message: message.into(),
            suggestion: suggestion.map(|s| s.to_string()),
        });
    }

    fn add_warning(&mut self, block: Option<&str>, message: impl Into<String>, suggestion: Option<&str>) {
        self.warnings.push(ValidationWarning {
            block: block.map(|s| s.to_string()),
            message: message.into(),
            suggestion: suggestion.map(|s| s.to_string()),
        });
    }

    /// Merge another result into this one.
    fn merge(&mut self, other: GraphValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Log the warnings and turn the errors into one semantic error
    pub fn into_result(self, model: &str) -> Result<(), SemanticError> {
        for warning in &self.warnings {
            tracing::warn!(
                model = %model,
                block = warning.block.as_deref().unwrap_or("-"),
                "{}",
                warning.message
            );
        }
        if self.valid {
            return Ok(());
        }
        let lines: Vec<String> = self
            .errors
            .iter()
            .map(|e| match &e.suggestion {
                Some(hint) => format!("{} ({})", e.message, hint),
                None => e.message.clone(),
            })
            .collect();
        Err(SemanticError::new(format!(
            "model {:?} is invalid:\n  {}",
            model,
            lines.join("\n  ")
        )))
    }
}

// ── Validator ───────────────────────────────────────────────────────────────

/// Validates an assembled model.
pub struct GraphValidator;

impl GraphValidator {
    /// Run every validation check against the model
    pub fn validate(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        result.merge(Self::check_inputs_connected_once(model));
        result.merge(Self::check_unused_outputs(model));
        result.merge(Self::check_public_outputs_produced(model));
        result.merge(Self::check_cycles(model));
        result.merge(Self::check_disconnected_blocks(model));

        result
    }

    // ── Individual checks ───────────────────────────────────────────────

    /// Every input of every block is fed by exactly one connection.
    fn check_inputs_connected_once(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        let mut feeds: HashMap<(&str, &str), usize> = HashMap::new();
        for conn in model.connections() {
            if let (Some(block), Some(input)) = (&conn.target_block, &conn.target_input) {
                *feeds.entry((block.as_str(), input.as_str())).or_default() += 1;
            }
        }

        for node in model.nodes() {
            for input in node.io().input_names() {
                match feeds.get(&(node.name.as_str(), input.as_str())).copied().unwrap_or(0) {
                    1 => {}
                    0 => result.add_error(
                        Some(&node.name),
                        format!("input {:?} of block {:?} is not connected", input, node.name),
                        Some("connect a signal to this input"),
                    ),
                    count => result.add_error(
                        Some(&node.name),
                        format!(
                            "input {:?} of block {:?} is connected {} times",
                            input, node.name, count
                        ),
                        None,
                    ),
                }
            }
        }
        result
    }

    /// Outputs of regular blocks that feed nothing are legal but suspicious.
    fn check_unused_outputs(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        let used: HashSet<(&str, &str)> = model
            .connections()
            .iter()
            .map(|c| (c.source_block.as_str(), c.source_output.as_str()))
            .collect();

        for node in model.nodes().iter().filter(|n| n.kind == NodeKind::Block) {
            for output in node.io().output_names() {
                if !used.contains(&(node.name.as_str(), output.as_str())) {
                    result.add_warning(
                        Some(&node.name),
                        format!("output {:?} of block {:?} is not used", output, node.name),
                        None,
                    );
                }
            }
        }
        result
    }

    /// Declared outputs without an output port never receive a value.
    fn check_public_outputs_produced(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        let ports: HashSet<&str> = model
            .nodes()
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::OutputPort(port) => Some(port.as_str()),
                _ => None,
            })
            .collect();

        for output in model.output_names() {
            if !ports.contains(output.as_str()) {
                result.add_warning(
                    None,
                    format!("declared output {:?} is never produced", output),
                    Some("end a connection with this output port"),
                );
            }
        }
        result
    }

    /// Feedback loops are allowed but only scheduled by timestamps.
    /// Kahn's algorithm: if we can't sort all nodes, the graph has a cycle.
    fn check_cycles(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in model.nodes() {
            in_degree.entry(node.name.as_str()).or_insert(0);
            adj.entry(node.name.as_str()).or_default();
        }

        for conn in model.connections() {
            if let Some(target) = &conn.target_block {
                adj.entry(conn.source_block.as_str())
                    .or_default()
                    .push(target.as_str());
                *in_degree.entry(target.as_str()).or_default() += 1;
            }
        }

        let mut queue: VecDeque<&str> = model
            .nodes()
            .iter()
            .map(|n| n.name.as_str())
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        let mut visited = 0usize;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            if let Some(neighbors) = adj.get(node) {
                for &neighbor in neighbors {
                    if let Some(deg) = in_degree.get_mut(neighbor) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        if visited < model.nodes().len() {
            let mut cycle_blocks: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(&name, _)| name)
                .collect();
            cycle_blocks.sort_unstable();

            result.add_warning(
                None,
                format!(
                    "feedback loop through blocks [{}]; only strictly newer samples propagate",
                    cycle_blocks.join(", ")
                ),
                None,
            );
        }

        result
    }

    /// Warn about blocks that have no connections at all.
    fn check_disconnected_blocks(model: &Model) -> GraphValidationResult {
        let mut result = GraphValidationResult::ok();

        let mut connected: HashSet<&str> = HashSet::new();
        for conn in model.connections() {
            connected.insert(conn.source_block.as_str());
            if let Some(target) = &conn.target_block {
                connected.insert(target.as_str());
            }
        }

        let blocks = model.block_names();
        for name in &blocks {
            if !connected.contains(name) && blocks.len() > 1 {
                result.add_warning(
                    Some(*name),
                    format!("block {:?} is not connected to any other block", name),
                    Some("connect this block or remove it from the model"),
                );
            }
        }
        result
    }
}
