//! In-memory index provider
//!
//! Reference physical index: entity → values, plus a reverse
//! value → entities map for lookups. The populator, the populating
//! updater and the online accessor of one index all share the same
//! structure, so the flip doesn't copy anything.

use crate::config::IndexSamplingConfig;
use crate::index::populator::{
    IndexAccessor, IndexPopulator, IndexProvider, IndexSample, IndexUpdater,
};
use crate::index::proxy::{IndexProxy, IndexProxyFactory};
use crate::types::{EntityId, IndexDescriptor, IndexEntryUpdate, IndexId, UpdateMode, Value};
use crate::{PopulationError, Result};
use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<InMemoryIndex>>;

/// Index data
#[derive(Debug)]
pub struct InMemoryIndex {
    descriptor: IndexDescriptor,
    entries: BTreeMap<EntityId, Vec<Value>>,
    by_value: AHashMap<Vec<u8>, BTreeSet<EntityId>>,

    /// Set once the populator finished successfully
    online: bool,
}

impl InMemoryIndex {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            entries: BTreeMap::new(),
            by_value: AHashMap::new(),
            online: false,
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values indexed for `entity`
    pub fn get(&self, entity: EntityId) -> Option<&[Value]> {
        self.entries.get(&entity).map(|v| v.as_slice())
    }

    /// Entities indexed under exactly `values`
    pub fn lookup(&self, values: &[Value]) -> Result<Vec<EntityId>> {
        let key = Value::key_bytes(values)?;
        Ok(self
            .by_value
            .get(&key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    /// All entries in entity id order
    pub fn entries(&self) -> impl Iterator<Item = (EntityId, &[Value])> {
        self.entries.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    fn put(&mut self, entity: EntityId, values: &[Value]) -> Result<()> {
        if let Some(old) = self.entries.insert(entity, values.to_vec()) {
            self.unlink(entity, &old)?;
        }
        let key = Value::key_bytes(values)?;
        self.by_value.entry(key).or_default().insert(entity);
        Ok(())
    }

    // Removal goes through the reverse map with the removed values, so a
    // stale REMOVE can't drop an entry that was already overwritten.
    fn remove(&mut self, entity: EntityId, values: &[Value]) -> Result<()> {
        self.unlink(entity, values)?;
        if self.entries.get(&entity).map(|v| v.as_slice()) == Some(values) {
            self.entries.remove(&entity);
        }
        Ok(())
    }

    fn unlink(&mut self, entity: EntityId, values: &[Value]) -> Result<()> {
        let key = Value::key_bytes(values)?;
        if let Some(ids) = self.by_value.get_mut(&key) {
            ids.remove(&entity);
            if ids.is_empty() {
                self.by_value.remove(&key);
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, update: &IndexEntryUpdate) -> Result<()> {
        match update.mode() {
            UpdateMode::Added => self.put(update.entity_id(), update.values()),
            UpdateMode::Changed => {
                if let Some(before) = update.before_values() {
                    self.remove(update.entity_id(), before)?;
                }
                self.put(update.entity_id(), update.values())
            }
            UpdateMode::Removed => self.remove(update.entity_id(), update.values()),
        }
    }

    /// Fail if any value is indexed for more than one entity
    pub fn verify_unique(&self) -> Result<()> {
        for ids in self.by_value.values() {
            if ids.len() > 1 {
                let conflicting: Vec<EntityId> = ids.iter().take(2).copied().collect();
                let values = self
                    .entries
                    .get(&conflicting[0])
                    .map(|v| v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                return Err(PopulationError::EntryConflict(format!(
                    "both entity {} and entity {} have the value ({}) in index {}",
                    conflicting[0], conflicting[1], values, self.descriptor.name
                )));
            }
        }
        Ok(())
    }
}

/// Provider keeping every index in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryIndexProvider {
    indexes: Arc<DashMap<IndexId, SharedIndex>>,
    failures: Arc<DashMap<IndexId, String>>,
}

impl InMemoryIndexProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, id: IndexId) -> Option<SharedIndex> {
        self.indexes.get(&id).map(|entry| entry.value().clone())
    }

    /// Failure recorded by `mark_as_failed`
    pub fn population_failure(&self, id: IndexId) -> Option<String> {
        self.failures.get(&id).map(|entry| entry.value().clone())
    }
}

impl IndexProvider for InMemoryIndexProvider {
    fn populator(
        &self,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexPopulator>> {
        Ok(Box::new(InMemoryIndexPopulator {
            descriptor: descriptor.clone(),
            indexes: self.indexes.clone(),
            failures: self.failures.clone(),
            index: None,
            sample_size_limit: sampling.sample_size_limit,
            sampled: AHashSet::new(),
            sample_size: 0,
            closed: false,
        }))
    }

    fn online_proxy_factory(&self, descriptor: &IndexDescriptor) -> Arc<dyn IndexProxyFactory> {
        Arc::new(InMemoryOnlineTarget {
            descriptor: descriptor.clone(),
            indexes: self.indexes.clone(),
        })
    }
}

/// Populator over one in-memory index
pub struct InMemoryIndexPopulator {
    descriptor: IndexDescriptor,
    indexes: Arc<DashMap<IndexId, SharedIndex>>,
    failures: Arc<DashMap<IndexId, String>>,

    /// Set by `create`
    index: Option<SharedIndex>,

    sample_size_limit: usize,
    sampled: AHashSet<Vec<u8>>,
    sample_size: u64,
    closed: bool,
}

impl InMemoryIndexPopulator {
    fn index(&self) -> Result<&SharedIndex> {
        self.index.as_ref().ok_or_else(|| {
            PopulationError::IllegalState(format!(
                "index {} has not been created",
                self.descriptor.name
            ))
        })
    }
}

impl IndexPopulator for InMemoryIndexPopulator {
    fn create(&mut self) -> Result<()> {
        let id = self.descriptor.id;
        let index = Arc::new(RwLock::new(InMemoryIndex::new(self.descriptor.clone())));
        match self.indexes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(PopulationError::StorageInitialization(format!(
                    "index {} already exists",
                    id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(index.clone());
            }
        }
        self.failures.remove(&id);
        self.index = Some(index);
        Ok(())
    }

    fn add(&mut self, updates: &[IndexEntryUpdate]) -> Result<()> {
        let mut index = self.index()?.write();
        for update in updates {
            index.apply(update)?;
        }
        Ok(())
    }

    fn verify_deferred_constraints(&mut self) -> Result<()> {
        if !self.descriptor.unique {
            return Ok(());
        }
        self.index()?.read().verify_unique()
    }

    fn new_populating_updater(&mut self) -> Result<Box<dyn IndexUpdater>> {
        Ok(Box::new(InMemoryIndexUpdater {
            index: self.index()?.clone(),
        }))
    }

    fn include_sample(&mut self, update: &IndexEntryUpdate) {
        if self.sample_size as usize >= self.sample_size_limit {
            return;
        }
        if let Ok(key) = Value::key_bytes(update.values()) {
            self.sampled.insert(key);
            self.sample_size += 1;
        }
    }

    fn sample_result(&mut self) -> Result<IndexSample> {
        let index_size = self.index()?.read().len() as u64;
        Ok(IndexSample::new(index_size, self.sampled.len() as u64, self.sample_size))
    }

    fn mark_as_failed(&mut self, failure: &str) {
        self.failures.insert(self.descriptor.id, failure.to_string());
    }

    fn close(&mut self, population_completed_successfully: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.index.take() {
            Some(index) if population_completed_successfully => {
                index.write().online = true;
                self.index = Some(index);
            }
            Some(_) => {
                // 丢弃未完成的索引
                self.indexes.remove(&self.descriptor.id);
            }
            None => {}
        }
        Ok(())
    }
}

/// Populating-phase updater
struct InMemoryIndexUpdater {
    index: SharedIndex,
}

impl IndexUpdater for InMemoryIndexUpdater {
    fn process(&mut self, update: &IndexEntryUpdate) -> Result<()> {
        self.index.write().apply(update)
    }
}

/// Online accessor
pub struct InMemoryIndexAccessor {
    index: SharedIndex,
}

impl IndexAccessor for InMemoryIndexAccessor {
    fn apply(&self, update: &IndexEntryUpdate) -> Result<()> {
        self.index.write().apply(update)
    }

    fn entity_count(&self) -> usize {
        self.index.read().len()
    }
}

/// Flip target resolving the built index at flip time
struct InMemoryOnlineTarget {
    descriptor: IndexDescriptor,
    indexes: Arc<DashMap<IndexId, SharedIndex>>,
}

impl IndexProxyFactory for InMemoryOnlineTarget {
    fn create(&self) -> Result<IndexProxy> {
        let index = self
            .indexes
            .get(&self.descriptor.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                PopulationError::IllegalState(format!(
                    "index {} was never created",
                    self.descriptor.id
                ))
            })?;
        Ok(IndexProxy::online(
            self.descriptor.clone(),
            Arc::new(InMemoryIndexAccessor { index }),
        ))
    }
}
