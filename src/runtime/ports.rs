//! Model port stubs
//!
//! Each model input is backed by an input stub: a block with no inputs and
//! one output carrying the port name, written by the model when a value
//! arrives from outside. Each model output port is backed by an output stub:
//! a block with one input whose arrivals the model surfaces on its own output.

use crate::core::block::{Block, BlockError, BlockIo, UpdateStatus};

/// Role of a node inside a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A regular block
    Block,
    /// Stub carrying the model input of that name
    InputPort(String),
    /// Stub feeding the model output of that name
    OutputPort(String),
}

impl NodeKind {
    pub fn is_port(&self) -> bool {
        !matches!(self, NodeKind::Block)
    }
}

/// Stub behind a model input
pub struct InputPort;

impl Block for InputPort {
    fn update(&mut self, _io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        Ok(UpdateStatus::Done)
    }
}

/// Stub behind a model output
pub struct OutputPort;

impl Block for OutputPort {
    fn update(&mut self, _io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        Ok(UpdateStatus::Done)
    }
}

/// Node name of a port stub: `in(x)` or `out(y)`
///
/// Block names in model files are identifiers, so stubs never take a name
/// a user block could ask for.
pub fn stub_name(kind: &NodeKind, taken: impl Fn(&str) -> bool) -> String {
    let prefix = match kind {
        NodeKind::InputPort(name) => format!("in({})", name),
        NodeKind::OutputPort(name) => format!("out({})", name),
        NodeKind::Block => "block".to_string(),
    };
    unique_name(&prefix, taken)
}

/// `prefix`, or `prefix2`, `prefix3`, ... whichever is free first
pub fn unique_name(prefix: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(prefix) {
        return prefix.to_string();
    }
    let mut count = 2;
    loop {
        let candidate = format!("{}{}", prefix, count);
        if !taken(&candidate) {
            return candidate;
        }
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name() {
        let taken = ["a", "a2"];
        assert_eq!(unique_name("b", |n| taken.contains(&n)), "b");
        assert_eq!(unique_name("a", |n| taken.contains(&n)), "a3");
    }

    #[test]
    fn test_stub_names() {
        let kind = NodeKind::InputPort("x".into());
        assert_eq!(stub_name(&kind, |_| false), "in(x)");
        assert_eq!(stub_name(&kind, |n| n == "in(x)"), "in(x)2");
        assert_eq!(stub_name(&NodeKind::OutputPort("y".into()), |_| false), "out(y)");
        assert!(kind.is_port());
        assert!(!NodeKind::Block.is_port());
    }
}
