//! procflow - timestamp-ordered dataflow engine
//!
//! This crate runs graphs of blocks described in a small model DSL. It
//! provides the block contract, a parser for model files, an assembler that
//! wires parsed models against a block registry, and a scheduler that drives
//! the resulting graph in timestamp order. Models are blocks themselves, so
//! they nest.

pub mod blocks;
pub mod core;
pub mod error;
pub mod lang;
pub mod runtime;
mod tests;

// Re-export commonly used types
pub use crate::core::{
    Block, BlockError, BlockIo, BlockSpec, ConfigMap, IoSpec, Registry, Settings, Slot, Timestamp,
    UpdateStatus, Value,
};
pub use error::{Error, Result};
pub use lang::{parse, parse_value, ParsedFile, ParsedModel};
pub use runtime::{BlockRuntime, Loader, Model};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
