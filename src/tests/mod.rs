//! Cross-module test suite
//!
//! Tests here drive whole models through the parser, the assembler and the
//! scheduler, grouped by what they exercise.

#[cfg(test)]
mod support;

#[cfg(test)]
mod assembly;
#[cfg(test)]
mod stats;
