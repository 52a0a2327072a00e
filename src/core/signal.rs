//! Signal system for block connections
//!
//! This module defines the data that flows between blocks: timestamps with
//! their two sentinels, the `(value, timestamp)` slots held on every block
//! input and output, the tables of named slots, and the connections that
//! link an output slot to an input slot.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Signal value - the dynamic payload carried by a slot
pub type Value = serde_json::Value;

/// Timestamp attached to every signal sample
///
/// Timestamps are totally ordered. [`Timestamp::ETERNITY`] marks constants and
/// sorts before every finite timestamp. The "not yet ready" state is not a
/// timestamp at all: it is modelled as `Option<Timestamp>::None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Timestamp of constants: older than any real time
    pub const ETERNITY: Timestamp = Timestamp(f64::NEG_INFINITY);

    /// Create a timestamp from seconds
    pub fn new(seconds: f64) -> Self {
        Timestamp(seconds)
    }

    /// Seconds value (`-inf` for ETERNITY)
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Whether this is the ETERNITY sentinel
    pub fn is_eternity(&self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    /// Whether this is a real, finite point in time
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

impl From<f64> for Timestamp {
    fn from(seconds: f64) -> Self {
        Timestamp(seconds)
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eternity() {
            write!(f, "ETERNITY")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A `(value, timestamp)` holder
///
/// A slot starts unset and becomes ready on its first write; from then on it
/// always holds the most recent sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub value: Value,
    pub timestamp: Option<Timestamp>,
}

impl Slot {
    /// Whether the slot has received at least one sample
    pub fn is_ready(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Overwrite the slot with a new sample
    pub fn write(&mut self, value: Value, timestamp: Timestamp) {
        self.value = value;
        self.timestamp = Some(timestamp);
    }
}

/// Handle used to address a signal either by position or by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalId<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for SignalId<'_> {
    fn from(index: usize) -> Self {
        SignalId::Index(index)
    }
}

impl<'a> From<&'a str> for SignalId<'a> {
    fn from(name: &'a str) -> Self {
        SignalId::Name(name)
    }
}

impl<'a> From<&'a String> for SignalId<'a> {
    fn from(name: &'a String) -> Self {
        SignalId::Name(name.as_str())
    }
}

impl fmt::Display for SignalId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalId::Index(i) => write!(f, "#{}", i),
            SignalId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// Ordered table of named slots (one per input or output of a block)
#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
    slots: Vec<Slot>,
}

impl SignalTable {
    /// Create a table of unset slots with the given names
    ///
    /// Returns the first duplicated name on failure.
    pub fn new(names: Vec<String>) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(name.clone());
            }
        }
        let slots = vec![Slot::default(); names.len()];
        Ok(Self {
            names,
            index,
            slots,
        })
    }

    /// Resolve a handle to a position
    pub fn position(&self, id: SignalId<'_>) -> Option<usize> {
        match id {
            SignalId::Index(i) if i < self.slots.len() => Some(i),
            SignalId::Index(_) => None,
            SignalId::Name(name) => self.index.get(name).copied(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, i: usize) -> &Slot {
        &self.slots[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut Slot {
        &mut self.slots[i]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Timestamps of all slots, in declaration order
    pub fn timestamps(&self) -> Vec<Option<Timestamp>> {
        self.slots.iter().map(|s| s.timestamp).collect()
    }

    /// Largest timestamp among the ready slots
    pub fn max_timestamp(&self) -> Option<Timestamp> {
        self.slots.iter().filter_map(|s| s.timestamp).max()
    }
}

/// Connection from an output slot to an input slot
///
/// A connection without destination is a terminator: it only publishes the
/// source output under its public name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique name of the signal within its model
    pub public_name: String,
    /// Source block name
    pub source_block: String,
    /// Source output name
    pub source_output: String,
    /// Destination block name (None for terminators)
    pub target_block: Option<String>,
    /// Destination input name (None for terminators)
    pub target_input: Option<String>,
}

impl Connection {
    /// Create a connection between two blocks
    pub fn new(
        public_name: impl Into<String>,
        source_block: impl Into<String>,
        source_output: impl Into<String>,
        target_block: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            source_block: source_block.into(),
            source_output: source_output.into(),
            target_block: Some(target_block.into()),
            target_input: Some(target_input.into()),
        }
    }

    /// Create a terminator that only names an output
    pub fn terminator(
        public_name: impl Into<String>,
        source_block: impl Into<String>,
        source_output: impl Into<String>,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            source_block: source_block.into(),
            source_output: source_output.into(),
            target_block: None,
            target_input: None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.target_block.is_none()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} --> ", self.source_block, self.source_output)?;
        match (&self.target_block, &self.target_input) {
            (Some(block), Some(input)) => write!(f, "{}.{}", block, input),
            _ => write!(f, "?.?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eternity_is_older_than_everything() {
        assert!(Timestamp::ETERNITY < Timestamp::new(f64::MIN));
        assert!(Timestamp::ETERNITY < Timestamp::new(0.0));
        assert_eq!(Timestamp::ETERNITY, Timestamp::ETERNITY);
        assert_eq!(Timestamp::ETERNITY.to_string(), "ETERNITY");
    }

    #[test]
    fn test_slot_lifecycle() {
        let mut slot = Slot::default();
        assert!(!slot.is_ready());

        slot.write(Value::from(3), Timestamp::new(1.0));
        assert!(slot.is_ready());
        assert_eq!(slot.value, Value::from(3));
        assert_eq!(slot.timestamp, Some(Timestamp::new(1.0)));
    }

    #[test]
    fn test_signal_table_lookup() {
        let table = SignalTable::new(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(table.position("b".into()), Some(1));
        assert_eq!(table.position(SignalId::Index(0)), Some(0));
        assert_eq!(table.position(SignalId::Index(2)), None);
        assert_eq!(table.position("c".into()), None);
        assert_eq!(table.max_timestamp(), None);
    }

    #[test]
    fn test_signal_table_rejects_duplicates() {
        let result = SignalTable::new(vec!["a".into(), "a".into()]);
        assert_eq!(result.unwrap_err(), "a");
    }

    #[test]
    fn test_connection_display() {
        let conn = Connection::new("x", "a", "out", "b", "in");
        assert_eq!(conn.to_string(), "a.out --> b.in");
        let term = Connection::terminator("y", "b", "out");
        assert!(term.is_terminator());
        assert_eq!(term.to_string(), "b.out --> ?.?");
    }
}
