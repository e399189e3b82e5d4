//! Schema state
//!
//! Derived, schema-dependent data (e.g. cached plan fragments) keyed by
//! string. Whenever an index comes online the whole state is invalidated,
//! since anything derived before may have been computed without it.

use crate::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait SchemaState: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: String);

    /// Drop everything derived so far
    fn clear(&self) -> Result<()>;
}

/// Process-wide schema state
#[derive(Debug, Default)]
pub struct DatabaseSchemaState {
    state: DashMap<String, String>,

    /// Bumped on every clear
    generation: AtomicU64,
}

impl DatabaseSchemaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl SchemaState for DatabaseSchemaState {
    fn get(&self, key: &str) -> Option<String> {
        self.state.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, value: String) {
        self.state.insert(key.to_string(), value);
    }

    fn clear(&self) -> Result<()> {
        self.state.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
