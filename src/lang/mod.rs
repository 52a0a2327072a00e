//! Model DSL front end
//!
//! Turns source text into a typed [`ParsedFile`]: a logos lexer feeds a
//! hand-written recursive descent parser. Every node carries a [`Location`]
//! and failures come back as a [`SyntaxError`] with a context window.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod location;
pub mod parser;

pub use ast::{ParsedFile, ParsedModel};
pub use error::{SyntaxError, SyntaxErrorKind};
pub use location::Location;
pub use parser::{parse, parse_value};
