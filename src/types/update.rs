//! Index entry updates (ADD / CHANGE / REMOVE)

use super::{EntityId, SchemaDescriptor, Value};

/// What an update does to an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    Added,
    Changed,
    Removed,
}

/// A single index entry update for one entity under one schema
///
/// For `Removed` the values are the pre-removal values, which the
/// index needs for reverse-lookup cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntryUpdate {
    entity_id: EntityId,
    schema: SchemaDescriptor,
    mode: UpdateMode,
    before: Option<Vec<Value>>,
    values: Vec<Value>,
}

impl IndexEntryUpdate {
    pub fn add(entity_id: EntityId, schema: SchemaDescriptor, values: Vec<Value>) -> Self {
        Self {
            entity_id,
            schema,
            mode: UpdateMode::Added,
            before: None,
            values,
        }
    }

    pub fn change(
        entity_id: EntityId,
        schema: SchemaDescriptor,
        before: Vec<Value>,
        after: Vec<Value>,
    ) -> Self {
        Self {
            entity_id,
            schema,
            mode: UpdateMode::Changed,
            before: Some(before),
            values: after,
        }
    }

    pub fn remove(entity_id: EntityId, schema: SchemaDescriptor, removed: Vec<Value>) -> Self {
        Self {
            entity_id,
            schema,
            mode: UpdateMode::Removed,
            before: None,
            values: removed,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// After-values for ADD/CHANGE, removed values for REMOVE
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Before-values of a CHANGE
    pub fn before_values(&self) -> Option<&[Value]> {
        self.before.as_deref()
    }
}
