//! Syntax errors.

use std::fmt;

use super::location::Location;

/// Category of syntax error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    /// Input the lexer does not recognize
    InvalidToken,
    /// A token other than the one the grammar requires
    UnexpectedToken,
    /// Input ended in the middle of a construct
    UnexpectedEof,
    /// Well-formed tokens arranged in a way the grammar forbids
    InvalidSyntax,
}

/// The parser rejected the source
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    pub location: Location,
    /// Source lines around the error, with a caret
    pub context: String,
}

impl SyntaxError {
    pub fn new(
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        location: Location,
        context: String,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
            context,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "syntax error: {}", self.message)?;
        write!(f, "  at {}", self.location)?;
        if !self.context.is_empty() {
            write!(f, "\n{}", self.context.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}
