//! In-memory entity store and its scans
//!
//! Entities live in id-ordered maps. A scan keeps only a cursor (the last
//! visited id) and reads the current committed record on every pull, so
//! writes that land ahead of the cursor are seen by the scan and writes
//! behind it are not.

use super::{EntityUpdates, IndexStoreView, PopulationProgress, StoreScan};
use crate::types::{EntityId, EntityType, PropertyKeyId, TokenId, Value};
use crate::{PopulationError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Stored entity: tokens + properties
#[derive(Debug, Clone, Default)]
struct EntityRecord {
    tokens: Vec<TokenId>,
    properties: BTreeMap<PropertyKeyId, Value>,
}

impl EntityRecord {
    fn has_any_token(&self, token_ids: &[TokenId]) -> bool {
        token_ids.is_empty() || self.tokens.iter().any(|t| token_ids.contains(t))
    }
}

/// In-memory node and relationship store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    nodes: RwLock<BTreeMap<EntityId, EntityRecord>>,
    relationships: RwLock<BTreeMap<EntityId, EntityRecord>>,
    next_node_id: AtomicU64,
    next_relationship_id: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self, entity_type: EntityType) -> &RwLock<BTreeMap<EntityId, EntityRecord>> {
        match entity_type {
            EntityType::Node => &self.nodes,
            EntityType::Relationship => &self.relationships,
        }
    }

    /// Create a node with labels and properties, returning its id
    pub fn create_node(
        &self,
        labels: &[TokenId],
        properties: &[(PropertyKeyId, Value)],
    ) -> EntityId {
        let id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        self.nodes.write().insert(id, Self::record(labels, properties));
        id
    }

    /// Create a relationship of `rel_type` with properties, returning its id
    pub fn create_relationship(
        &self,
        rel_type: TokenId,
        properties: &[(PropertyKeyId, Value)],
    ) -> EntityId {
        let id = self.next_relationship_id.fetch_add(1, Ordering::SeqCst);
        self.relationships
            .write()
            .insert(id, Self::record(&[rel_type], properties));
        id
    }

    fn record(tokens: &[TokenId], properties: &[(PropertyKeyId, Value)]) -> EntityRecord {
        EntityRecord {
            tokens: tokens.to_vec(),
            properties: properties.iter().cloned().collect(),
        }
    }

    /// Set a property, returning the previous value
    pub fn set_property(
        &self,
        entity_type: EntityType,
        id: EntityId,
        key: PropertyKeyId,
        value: Value,
    ) -> Result<Option<Value>> {
        let mut records = self.records(entity_type).write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| {
                PopulationError::InvalidArgument(format!("{} {} not found", entity_type, id))
            })?;
        Ok(record.properties.insert(key, value))
    }

    /// Remove a property, returning the removed value
    pub fn remove_property(
        &self,
        entity_type: EntityType,
        id: EntityId,
        key: PropertyKeyId,
    ) -> Result<Option<Value>> {
        let mut records = self.records(entity_type).write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| {
                PopulationError::InvalidArgument(format!("{} {} not found", entity_type, id))
            })?;
        Ok(record.properties.remove(&key))
    }

    /// Delete an entity; returns whether it existed
    pub fn delete(&self, entity_type: EntityType, id: EntityId) -> bool {
        self.records(entity_type).write().remove(&id).is_some()
    }

    pub fn property(
        &self,
        entity_type: EntityType,
        id: EntityId,
        key: PropertyKeyId,
    ) -> Option<Value> {
        self.records(entity_type)
            .read()
            .get(&id)
            .and_then(|r| r.properties.get(&key).cloned())
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.records(entity_type).read().len()
    }
}

/// Store view handing out id-ordered live scans
#[derive(Debug, Clone)]
pub struct InMemoryStoreView {
    store: Arc<InMemoryStore>,
}

impl InMemoryStoreView {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }
}

impl IndexStoreView for InMemoryStoreView {
    // There is no token lookup structure here, every scan walks all records.
    fn scan(
        &self,
        entity_type: EntityType,
        token_ids: &[TokenId],
        property_keys: &[PropertyKeyId],
        _force_full_scan: bool,
    ) -> Result<Arc<dyn StoreScan>> {
        Ok(Arc::new(InMemoryStoreScan::new(
            self.store.clone(),
            entity_type,
            token_ids.to_vec(),
            property_keys.to_vec(),
        )))
    }
}

/// Cursor-based scan over an `InMemoryStore`
pub struct InMemoryStoreScan {
    store: Arc<InMemoryStore>,
    entity_type: EntityType,
    token_ids: Vec<TokenId>,
    property_keys: Vec<PropertyKeyId>,

    /// Last visited id (None = not started)
    cursor: Mutex<Option<EntityId>>,
    stopped: AtomicBool,
    visited: AtomicU64,

    /// Record count when the scan was created
    estimated_total: u64,
}

impl InMemoryStoreScan {
    fn new(
        store: Arc<InMemoryStore>,
        entity_type: EntityType,
        token_ids: Vec<TokenId>,
        property_keys: Vec<PropertyKeyId>,
    ) -> Self {
        let estimated_total = store.count(entity_type) as u64;
        Self {
            store,
            entity_type,
            token_ids,
            property_keys,
            cursor: Mutex::new(None),
            stopped: AtomicBool::new(false),
            visited: AtomicU64::new(0),
            estimated_total,
        }
    }
}

impl StoreScan for InMemoryStoreScan {
    fn next_entity(&self) -> Result<Option<EntityUpdates>> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(None);
        }

        let mut cursor = self.cursor.lock();
        let records = self.store.records(self.entity_type).read();
        let lower = match *cursor {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };

        for (id, record) in records.range((lower, Bound::Unbounded)) {
            *cursor = Some(*id);
            self.visited.fetch_add(1, Ordering::Relaxed);
            if !record.has_any_token(&self.token_ids) {
                continue;
            }
            let properties = record
                .properties
                .iter()
                .filter(|(key, _)| self.property_keys.contains(key))
                .map(|(key, value)| (*key, value.clone()))
                .collect();
            return Ok(Some(EntityUpdates::new(*id, record.tokens.clone(), properties)));
        }

        Ok(None)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn progress(&self) -> PopulationProgress {
        let visited = self.visited.load(Ordering::Relaxed);
        PopulationProgress::single(visited, self.estimated_total.max(visited))
    }
}
