//! Built-in blocks
//!
//! The `std` package, preloaded by [`Registry::default_library`]:
//! `constant`, `gain`, `sum`, `identity`, `sequence` and `print`.

pub mod arith;
pub mod constant;
pub mod identity;
pub mod print;
pub mod sequence;

pub use arith::{GainBlock, SumBlock};
pub use constant::ConstantBlock;
pub use identity::IdentityBlock;
pub use print::PrintBlock;
pub use sequence::SequenceBlock;

use crate::core::block::Block;
use crate::core::registry::Registry;
use crate::error::Error;

/// Register the built-in blocks and the `std` package name
pub fn register_std(registry: &Registry) -> Result<(), Error> {
    registry.register_fn(ConstantBlock::spec(), |config| {
        Ok(Box::new(ConstantBlock::new(config)?) as Box<dyn Block>)
    })?;
    registry.register_fn(GainBlock::spec(), |config| {
        Ok(Box::new(GainBlock::new(config)?) as Box<dyn Block>)
    })?;
    registry.register_fn(SumBlock::spec(), |_| Ok(Box::new(SumBlock) as Box<dyn Block>))?;
    registry.register_fn(IdentityBlock::spec(), |_| {
        Ok(Box::new(IdentityBlock) as Box<dyn Block>)
    })?;
    registry.register_fn(SequenceBlock::spec(), |config| {
        Ok(Box::new(SequenceBlock::new(config)?) as Box<dyn Block>)
    })?;
    registry.register_fn(PrintBlock::spec(), |_| Ok(Box::new(PrintBlock) as Box<dyn Block>))?;

    // already installed; `import std` is a no-op
    registry.register_package("std", |_| Ok(()));
    Ok(())
}
