//! Store scan layer
//!
//! A store scan is a one-shot, pull-style traversal over the entities an
//! index population needs to see. Each pulled entity carries its label or
//! relationship-type set and the subset of its properties that any of the
//! populated schemas cares about, so an entity is read once no matter how
//! many indexes are being built from it.
//!
//! # Contract
//! - Every matching entity is visited at most once, in a stable physical
//!   order; a scan is never restarted.
//! - `stop()` may be called from any thread and makes an in-flight or
//!   future `next_entity()` return `Ok(None)` promptly.
//! - A read error aborts the scan; entities already handed out are not
//!   rolled back by the scan itself.

mod memory;

pub use memory::{InMemoryStore, InMemoryStoreScan, InMemoryStoreView};

use crate::index::IndexUpdater;
use crate::types::{
    EntityId, EntityType, IndexEntryUpdate, PropertyKeyId, SchemaDescriptor, TokenId, Value,
};
use crate::Result;
use std::sync::Arc;

/// Completion estimate of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationProgress {
    pub completed: u64,
    pub total: u64,
}

impl PopulationProgress {
    pub const NONE: PopulationProgress = PopulationProgress { completed: 0, total: 0 };
    pub const DONE: PopulationProgress = PopulationProgress { completed: 1, total: 1 };

    pub fn single(completed: u64, total: u64) -> Self {
        Self { completed, total }
    }

    /// Fraction in `[0, 1]`; an empty scan counts as done
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed.min(self.total) as f64 / self.total as f64) as f32
    }
}

/// Snapshot of one scanned entity: its tokens and selected property values
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdates {
    pub entity_id: EntityId,

    /// Labels (nodes) or the single relationship type
    pub entity_tokens: Vec<TokenId>,

    /// Only the properties some populated schema asked for
    pub properties: Vec<(PropertyKeyId, Value)>,
}

impl EntityUpdates {
    pub fn new(
        entity_id: EntityId,
        entity_tokens: Vec<TokenId>,
        properties: Vec<(PropertyKeyId, Value)>,
    ) -> Self {
        Self {
            entity_id,
            entity_tokens,
            properties,
        }
    }

    pub fn property(&self, key: PropertyKeyId) -> Option<&Value> {
        self.properties.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// The ADD entry this entity contributes to `schema`, if any.
    ///
    /// Requires the schema's token and every one of its property keys.
    pub fn index_update(&self, schema: &SchemaDescriptor) -> Option<IndexEntryUpdate> {
        if !self.entity_tokens.contains(&schema.entity_token) {
            return None;
        }
        let values = schema
            .property_keys
            .iter()
            .map(|key| self.property(*key).cloned())
            .collect::<Option<Vec<Value>>>()?;
        Some(IndexEntryUpdate::add(self.entity_id, schema.clone(), values))
    }
}

/// One-shot pull iterator over entities
pub trait StoreScan: Send + Sync {
    /// Next matching entity, `Ok(None)` once exhausted or stopped
    fn next_entity(&self) -> Result<Option<EntityUpdates>>;

    /// Request cooperative early termination
    fn stop(&self);

    /// Apply a queued concurrent update now if the scan already went past
    /// its entity; returns whether it was applied.
    ///
    /// The default assumes ascending entity id order.
    fn accept_update(
        &self,
        updater: &mut dyn IndexUpdater,
        update: &IndexEntryUpdate,
        current_entity_id: EntityId,
    ) -> Result<bool> {
        if update.entity_id() <= current_entity_id {
            updater.process(update)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Monotonically non-decreasing completion estimate
    fn progress(&self) -> PopulationProgress;
}

/// Source of store scans
pub trait IndexStoreView: Send + Sync {
    /// Scan entities of `entity_type` carrying any of `token_ids`, selecting
    /// the properties in `property_keys`.
    ///
    /// `force_full_scan` bypasses any token lookup structure the store might
    /// otherwise use to find candidates.
    fn scan(
        &self,
        entity_type: EntityType,
        token_ids: &[TokenId],
        property_keys: &[PropertyKeyId],
        force_full_scan: bool,
    ) -> Result<Arc<dyn StoreScan>>;
}

/// A store with nothing in it
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStoreView;

struct EmptyScan;

impl StoreScan for EmptyScan {
    fn next_entity(&self) -> Result<Option<EntityUpdates>> {
        Ok(None)
    }

    fn stop(&self) {}

    fn progress(&self) -> PopulationProgress {
        PopulationProgress::DONE
    }
}

impl IndexStoreView for EmptyStoreView {
    fn scan(
        &self,
        _entity_type: EntityType,
        _token_ids: &[TokenId],
        _property_keys: &[PropertyKeyId],
        _force_full_scan: bool,
    ) -> Result<Arc<dyn StoreScan>> {
        Ok(Arc::new(EmptyScan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_update_requires_token_and_all_keys() {
        let schema = SchemaDescriptor::for_label(0, &[0, 1]);

        let full = EntityUpdates::new(7, vec![0, 3], vec![(0, "a".into()), (1, 2i64.into())]);
        let update = full.index_update(&schema).unwrap();
        assert_eq!(update.entity_id(), 7);
        assert_eq!(update.values(), &[Value::from("a"), Value::from(2i64)]);

        let wrong_label = EntityUpdates::new(8, vec![1], vec![(0, "a".into()), (1, 2i64.into())]);
        assert!(wrong_label.index_update(&schema).is_none());

        let missing_key = EntityUpdates::new(9, vec![0], vec![(0, "a".into())]);
        assert!(missing_key.index_update(&schema).is_none());
    }

    #[test]
    fn test_progress_fraction() {
        assert!((PopulationProgress::single(42, 100).fraction() - 0.42).abs() < 1e-6);
        assert_eq!(PopulationProgress::NONE.fraction(), 1.0);
        assert_eq!(PopulationProgress::single(5, 4).fraction(), 1.0);
    }

    #[test]
    fn test_empty_store_view() {
        let scan = EmptyStoreView.scan(EntityType::Node, &[0], &[0], false).unwrap();
        assert!(scan.next_entity().unwrap().is_none());
        assert_eq!(scan.progress(), PopulationProgress::DONE);
    }
}
