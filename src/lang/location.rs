//! Source positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a parsed element, used verbatim in error messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Source file, `None` for in-memory text
    pub file: Option<String>,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
}

impl Location {
    pub fn new(file: Option<String>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<string>");
        write!(f, "{}:{}:{}", file, self.line, self.column)
    }
}

/// Maps byte offsets of one source text to lines and columns
pub(crate) struct SourceMap<'src> {
    source: &'src str,
    file: Option<String>,
    line_starts: Vec<usize>,
}

impl<'src> SourceMap<'src> {
    pub fn new(source: &'src str, file: Option<&str>) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            source,
            file: file.map(str::to_string),
            line_starts,
        }
    }

    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self
            .source
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        Location::new(self.file.clone(), line + 1, column + 1)
    }

    /// Up to three lines around `location` with a caret under its column
    pub fn context(&self, location: &Location) -> String {
        let lines: Vec<&str> = self.source.lines().collect();
        let current = location.line.saturating_sub(1);
        let first = current.saturating_sub(1);
        let last = (current + 1).min(lines.len().saturating_sub(1));

        let mut out = String::new();
        for (i, text) in lines.iter().enumerate().take(last + 1).skip(first) {
            out.push_str(&format!("{:>4} | {}\n", i + 1, text));
            if i == current {
                out.push_str(&format!("     | {}^\n", " ".repeat(location.column.saturating_sub(1))));
            }
        }
        out
    }
}
