//! Core block abstractions and types
//!
//! This module defines the block contract, the signals blocks exchange, the
//! config they declare, the registry that creates them and the statistics
//! recorded while they run.

pub mod block;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod signal;

pub use block::{Block, BlockError, BlockIo, BlockSpec, DataStatus, IoSpec, SignalDecl, UpdateStatus};
pub use config::{ConfigDecl, ConfigMap, Settings};
pub use metrics::{ExecutionStats, StatsReport};
pub use registry::{BlockFactory, Registry, RegistryError};
pub use signal::{Connection, SignalId, Slot, Timestamp, Value};
