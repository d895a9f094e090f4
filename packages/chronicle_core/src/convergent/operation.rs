//! The four primitive mutations for the replicated document
//!
//! Every change to the shared document, local or remote, is one of these
//! operations wrapped in an envelope. A transaction commits as a
//! `DeltaFrame` of envelopes that replicas apply atomically.

use super::horizon::{Horizon, PeerId, SeqNum};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique identifier for an operation.
pub type OpId = Uuid;

/// The three replicated containers of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Container {
    Nodes,
    Meta,
    Palette,
}

impl Container {
    /// All containers, in a fixed order.
    pub const ALL: [Container; 3] = [Container::Nodes, Container::Meta, Container::Palette];
}

/// A value that can be stored in fields or sequences.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(std::collections::BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn float(n: f64) -> Self {
        Value::Float(n)
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view accepting either integer or float representation.
    /// Snapshot payloads may carry whole-numbered order keys as integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

// Floats are compared by bit pattern so Value can key indexes and settle
// deterministic tie-breaks. NaN never enters the document (no arithmetic
// produces one from finite order keys).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(n) => {
                2u8.hash(state);
                n.hash(state);
            }
            Value::Float(n) => {
                3u8.hash(state);
                n.to_bits().hash(state);
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::List(l) => {
                5u8.hash(state);
                l.hash(state);
            }
            Value::Map(m) => {
                6u8.hash(state);
                m.hash(state);
            }
        }
    }
}

/// The four primitive mutations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Set a field on an entry (latest-wins per field).
    SetField {
        container: Container,
        key: String,
        field: String,
        value: Value,
    },

    /// Remove an entry (informed-remove: only cancels what the remover's
    /// horizon had seen).
    RemoveKey { container: Container, key: String },

    /// Append an element to a replicated sequence.
    Append {
        container: Container,
        list: String,
        element: Value,
    },

    /// Remove occurrences of an element from a sequence (informed-remove).
    Erase {
        container: Container,
        list: String,
        element: Value,
        /// The specific Append operation ids this erase observed.
        observed: Vec<OpId>,
    },
}

impl Mutation {
    /// Get the container this mutation affects.
    pub fn container(&self) -> Container {
        match self {
            Mutation::SetField { container, .. } => *container,
            Mutation::RemoveKey { container, .. } => *container,
            Mutation::Append { container, .. } => *container,
            Mutation::Erase { container, .. } => *container,
        }
    }

    /// Create a SetField mutation.
    pub fn set_field(
        container: Container,
        key: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        Mutation::SetField {
            container,
            key: key.into(),
            field: field.into(),
            value,
        }
    }

    /// Create a RemoveKey mutation.
    pub fn remove_key(container: Container, key: impl Into<String>) -> Self {
        Mutation::RemoveKey {
            container,
            key: key.into(),
        }
    }

    /// Create an Append mutation.
    pub fn append(container: Container, list: impl Into<String>, element: Value) -> Self {
        Mutation::Append {
            container,
            list: list.into(),
            element,
        }
    }

    /// Create an Erase mutation.
    pub fn erase(
        container: Container,
        list: impl Into<String>,
        element: Value,
        observed: Vec<OpId>,
    ) -> Self {
        Mutation::Erase {
            container,
            list: list.into(),
            element,
            observed,
        }
    }
}

/// A mutation wrapped with metadata for transmission and storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpEnvelope {
    /// Unique id for this operation.
    pub id: OpId,

    /// Which peer authored this operation.
    pub author: PeerId,

    /// Sequence number within the author's stream.
    pub seq: SeqNum,

    /// Wall-clock timestamp in milliseconds (for latest-wins tiebreaking).
    pub timestamp: u64,

    /// What the author had seen when it created this operation.
    pub horizon: Horizon,

    /// The actual mutation.
    pub op: Mutation,
}

impl OpEnvelope {
    /// Create a new operation envelope stamped with the current time.
    pub fn new(author: PeerId, seq: SeqNum, horizon: Horizon, op: Mutation) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::at(timestamp, author, seq, horizon, op)
    }

    /// Create an envelope with an explicit timestamp.
    pub fn at(timestamp: u64, author: PeerId, seq: SeqNum, horizon: Horizon, op: Mutation) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            seq,
            timestamp,
            horizon,
            op,
        }
    }

    /// Check if this operation was informed about another operation.
    pub fn had_seen(&self, other: &OpEnvelope) -> bool {
        self.horizon.has_seen(other.author, other.seq)
    }

    /// Compare for latest-wins ordering: timestamp, then author, then
    /// sequence number. (author, seq) is unique, so this is a total
    /// order and every replica picks the same winner.
    pub fn is_later_than(&self, other: &OpEnvelope) -> bool {
        (self.timestamp, self.author, self.seq) > (other.timestamp, other.author, other.seq)
    }
}

/// One transaction's worth of envelopes, applied atomically by every
/// replica. Observers never see a frame half-applied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaFrame {
    pub ops: Vec<OpEnvelope>,
}

impl DeltaFrame {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
