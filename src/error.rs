//! Error taxonomy
//!
//! Every failure the engine reports is one of the variants of [`Error`]:
//! rejected source text, an invalid model, an impossible block declaration,
//! a scheduler misuse, a failing block method, or failing cleanups.

use std::fmt;

use crate::core::registry::RegistryError;
use crate::lang::{Location, SyntaxError};

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The parser rejected the source
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// The model references something invalid
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    /// A block type declares something impossible
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// The engine was driven incorrectly
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A block method failed
    #[error(transparent)]
    BlockMethod(#[from] BlockMethodError),

    /// One or more cleanups failed
    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    /// Loader I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the failure is a mistake in the model or block declarations
    /// rather than something that went wrong while running
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Syntax(_) | Error::Semantic(_) | Error::Writer(_)
        )
    }

    /// Shorthand for a semantic error without location
    pub fn semantic(message: impl Into<String>) -> Self {
        Error::Semantic(SemanticError::new(message))
    }

    pub(crate) fn io(path: impl fmt::Display, source: std::io::Error) -> Self {
        Error::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl From<RegistryError> for Error {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Invalid(writer) => Error::Writer(writer),
            other => Error::Semantic(SemanticError::new(other.to_string())),
        }
    }
}

/// The model AST references something invalid
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticError {
    pub message: String,
    pub location: Option<Location>,
}

impl SemanticError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn at(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }

    /// Attach a location unless one is already known
    pub fn or_at(mut self, location: Option<&Location>) -> Self {
        if self.location.is_none() {
            self.location = location.cloned();
        }
        self
    }
}

impl std::error::Error for SemanticError {}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semantic error: {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, "\n  at {}", location)?;
        }
        Ok(())
    }
}

/// A block type declares something impossible
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid block type {block:?}: {message}")]
pub struct WriterError {
    pub block: String,
    pub message: String,
}

impl WriterError {
    pub fn new(block: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            message: message.into(),
        }
    }
}

/// The engine was driven against its contract
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// `update()` called while nothing is queued and no generator has data
    #[error("update() called on model {0:?} with no pending work")]
    NoWork(String),

    /// Lifecycle method called in the wrong state
    #[error("model {model:?}: {message}")]
    Lifecycle { model: String, message: String },

    /// Unknown public signal
    #[error("model {model:?} has no public signal {signal:?}")]
    UnknownSignal { model: String, signal: String },

    /// A value pushed into the model was rejected
    #[error("model {model:?}: invalid sample on {signal:?}: {message}")]
    InvalidSample {
        model: String,
        signal: String,
        message: String,
    },

    /// Model interrupted from outside
    #[error("run cancelled")]
    Cancelled,
}

/// Lifecycle method of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    Update,
    NextDataStatus,
    Finish,
    Cleanup,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Init => "init",
            Method::Update => "update",
            Method::NextDataStatus => "next_data_status",
            Method::Finish => "finish",
            Method::Cleanup => "cleanup",
        };
        write!(f, "{}()", name)
    }
}

/// A block method failed
///
/// `chain` lists the enclosing block names, outermost first; its last entry
/// is the block whose method failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMethodError {
    pub method: Method,
    pub chain: Vec<String>,
    pub message: String,
}

impl BlockMethodError {
    pub fn new(method: Method, block: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method,
            chain: vec![block.into()],
            message: message.into(),
        }
    }

    /// Name of the block that actually failed
    pub fn block(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or("?")
    }

    /// Record an enclosing block
    pub fn within(mut self, block: impl Into<String>) -> Self {
        self.chain.insert(0, block.into());
        self
    }
}

impl std::error::Error for BlockMethodError {}

impl fmt::Display for BlockMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block {} failed in {}:", self.chain.join(" > "), self.method)?;
        write!(f, "{}", indent(&self.message, "    "))
    }
}

/// One or more blocks failed their cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupError {
    /// `(block, message)` for every failed cleanup
    pub failures: Vec<(String, String)>,
}

impl std::error::Error for CleanupError {}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup failed for {} block(s)", self.failures.len())?;
        for (block, message) in &self.failures {
            write!(f, "\n  {}:\n{}", block, indent(message, "    "))?;
        }
        Ok(())
    }
}

pub(crate) fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type for engine operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        assert!(Error::semantic("x").is_user_error());
        assert!(Error::from(WriterError::new("b", "bad")).is_user_error());
        assert!(!Error::from(RuntimeError::Cancelled).is_user_error());
        let method = BlockMethodError::new(Method::Update, "b", "boom");
        assert!(!Error::from(method).is_user_error());
    }

    #[test]
    fn test_block_method_chain() {
        let err = BlockMethodError::new(Method::Update, "inner", "boom\nsecond line")
            .within("child")
            .within("root");
        assert_eq!(err.block(), "inner");
        let text = err.to_string();
        assert!(text.starts_with("block root > child > inner failed in update():"));
        assert!(text.contains("\n    boom\n    second line"));
    }

    #[test]
    fn test_cleanup_error_lists_every_failure() {
        let err = CleanupError {
            failures: vec![("a".into(), "x".into()), ("b".into(), "y".into())],
        };
        let text = err.to_string();
        assert!(text.contains("2 block(s)"));
        assert!(text.contains("a:") && text.contains("b:"));
    }

    #[test]
    fn test_semantic_location_is_kept() {
        let loc = Location::new(Some("m.pg".into()), 3, 5);
        let err = SemanticError::new("bad").or_at(Some(&loc));
        assert_eq!(err.location, Some(loc.clone()));
        let other = Location::new(None, 1, 1);
        assert_eq!(err.or_at(Some(&other)).location, Some(loc));
    }
}
