//! Property values, entity identifiers and index-shaped records

mod schema;
mod update;

pub use schema::{IndexDescriptor, SchemaDescriptor};
pub use update::{IndexEntryUpdate, UpdateMode};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier (node or relationship id)
pub type EntityId = u64;

/// Label id for node schemas, relationship type id for relationship schemas
pub type TokenId = u32;

/// Property key token id
pub type PropertyKeyId = u32;

/// Index identifier
pub type IndexId = u64;

/// Which kind of entity an index covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Node,
    Relationship,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Node => write!(f, "NODE"),
            EntityType::Relationship => write!(f, "RELATIONSHIP"),
        }
    }
}

/// Indexable property value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// Integer value
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Boolean value
    Bool(bool),

    /// Text string
    Text(String),
}

impl Value {
    /// Stable byte key for hashing and reverse lookups.
    ///
    /// Floats are keyed by bit pattern, so `0.0` and `-0.0` are distinct.
    pub fn key_bytes(values: &[Value]) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(values)?)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
