//! Typed syntax tree of model files.
//!
//! Every node is serde-serializable so parsed files can be cached next to
//! their source.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::location::Location;

/// One parsed source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub file: Option<String>,
    pub models: Vec<ParsedModel>,
}

/// A model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedModel {
    /// `None` for the anonymous model of a file without headers
    pub name: Option<String>,
    pub docstring: Option<String>,
    pub configs: Vec<ConfigStmt>,
    pub inputs: Vec<IoStmt>,
    pub outputs: Vec<IoStmt>,
    pub imports: Vec<ImportStmt>,
    pub assignments: Vec<Assignment>,
    pub connections: Vec<ConnectionStmt>,
    pub location: Location,
}

impl ParsedModel {
    pub(crate) fn empty(name: Option<String>, location: Location) -> Self {
        Self {
            name,
            docstring: None,
            configs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            imports: Vec::new(),
            assignments: Vec::new(),
            connections: Vec::new(),
            location,
        }
    }

    /// Input ports used as the first segment of a connection, in order of appearance
    pub fn input_ports(&self) -> Vec<&PortRef> {
        self.connections
            .iter()
            .filter_map(|c| match c.elements.first() {
                Some(Element::Port(port)) => Some(port),
                _ => None,
            })
            .collect()
    }

    /// Output ports used as the last segment of a connection, in order of appearance
    pub fn output_ports(&self) -> Vec<&PortRef> {
        self.connections
            .iter()
            .filter(|c| c.elements.len() > 1)
            .filter_map(|c| match c.elements.last() {
                Some(Element::Port(port)) => Some(port),
                _ => None,
            })
            .collect()
    }
}

/// `config name [= default] ["description"]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigStmt {
    pub name: String,
    pub default: Option<Literal>,
    pub description: Option<String>,
    pub location: Location,
}

/// `input name ["description"]` or `output name ["description"]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoStmt {
    pub name: String,
    pub description: Option<String>,
    pub location: Location,
}

/// `import package.name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStmt {
    pub package: String,
    pub location: Location,
}

/// `key = value`, where a dotted key addresses a block property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub key: String,
    pub value: Literal,
    pub location: Location,
}

/// A polyline of segments joined by `->`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStmt {
    pub elements: Vec<Element>,
    pub location: Location,
}

/// One segment of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Block(BlockRef),
    Signals(SignalList),
    Port(PortRef),
}

/// `|name: type key=value ...|`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub name: Option<String>,
    pub kind: BlockKind,
    pub config: Vec<(String, Literal)>,
    pub location: Location,
}

/// How a block names its type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Literal type name (identifier or quoted string)
    Name(String),
    /// Type name taken from a variable at assembly time
    Ref(String),
}

/// `(name)` model port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRef {
    pub name: String,
    pub location: Location,
}

/// Comma-separated signals between two segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalList {
    pub signals: Vec<SignalRef>,
    pub location: Location,
}

/// `[local_input] block.name [local_output]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRef {
    pub name: String,
    pub block: Option<String>,
    /// Output of the upstream block feeding this signal
    pub local_input: Option<LocalName>,
    /// Input of the downstream block this signal feeds
    pub local_output: Option<LocalName>,
    pub location: Location,
}

impl fmt::Display for SignalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local_input {
            write!(f, "[{}]", local)?;
        }
        if let Some(block) = &self.block {
            write!(f, "{}.", block)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(local) = &self.local_output {
            write!(f, "[{}]", local)?;
        }
        Ok(())
    }
}

/// Block-local signal, by name or position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalName {
    Name(String),
    Index(usize),
}

impl fmt::Display for LocalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalName::Name(name) => write!(f, "{}", name),
            LocalName::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Literal value as written in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Dict(Vec<(String, Literal)>),
    /// `...`
    Ellipsis,
    /// `$name` / `${name}`
    Ref(String),
}

impl Literal {
    /// Convert to a signal value; `None` if a reference is left unresolved
    pub fn to_value(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        Some(match self {
            Literal::Null | Literal::Ellipsis => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(x) => Value::from(*x),
            Literal::Str(s) => Value::String(s.clone()),
            Literal::List(items) => Value::Array(
                items
                    .iter()
                    .map(Literal::to_value)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Literal::Dict(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| v.to_value().map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Literal::Ref(_) => return None,
        })
    }
}

impl From<&serde_json::Value> for Literal {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Literal::Null,
            Value::Bool(b) => Literal::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Literal::Str(s.clone()),
            Value::Array(items) => Literal::List(items.iter().map(Literal::from).collect()),
            Value::Object(map) => Literal::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Literal::from(v)))
                    .collect(),
            ),
        }
    }
}
