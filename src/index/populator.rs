//! Physical index contracts
//!
//! The storage side of population: a populator builds one index from
//! batches, an updater applies single updates while the index is still
//! populating, and an accessor serves the index once it is online. All
//! three are provided by an `IndexProvider`.

use crate::config::IndexSamplingConfig;
use crate::index::proxy::IndexProxyFactory;
use crate::types::{IndexDescriptor, IndexEntryUpdate};
use crate::Result;
use std::sync::Arc;

/// Builds one index while it is in the populating state
///
/// Lifecycle: `create` → any number of `add` / updater calls → `close`.
/// Only the population job thread calls into a populator.
pub trait IndexPopulator: Send {
    /// Allocate the empty structure.
    ///
    /// Fails with `StorageInitialization` if the index already exists or
    /// the medium is unwritable.
    fn create(&mut self) -> Result<()>;

    /// Bulk-ingest a batch of scan-derived ADD entries.
    ///
    /// Called several times with disjoint batches.
    fn add(&mut self, updates: &[IndexEntryUpdate]) -> Result<()>;

    /// Check uniqueness for constraint-backing indexes
    fn verify_deferred_constraints(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sink for ADD/CHANGE/REMOVE updates that arrived concurrently
    fn new_populating_updater(&mut self) -> Result<Box<dyn IndexUpdater>>;

    /// Feed one entry into the selectivity sample; never fails
    fn include_sample(&mut self, update: &IndexEntryUpdate);

    fn sample_result(&mut self) -> Result<IndexSample>;

    /// Record a human-readable failure; never fails
    fn mark_as_failed(&mut self, failure: &str);

    /// Finalize. `false` discards whatever was built so far and must be
    /// safe to call even if `create` failed.
    fn close(&mut self, population_completed_successfully: bool) -> Result<()>;
}

/// Applies single updates to an index
pub trait IndexUpdater: Send {
    fn process(&mut self, update: &IndexEntryUpdate) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Serves an online index
pub trait IndexAccessor: Send + Sync {
    fn apply(&self, update: &IndexEntryUpdate) -> Result<()>;

    /// Number of indexed entities
    fn entity_count(&self) -> usize;
}

/// Selectivity sample of a populated index
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexSample {
    /// Entries in the index
    pub index_size: u64,

    /// Distinct values among the sampled entries
    pub unique_values: u64,

    /// Entries that went into the sample
    pub sample_size: u64,
}

impl IndexSample {
    pub fn new(index_size: u64, unique_values: u64, sample_size: u64) -> Self {
        Self {
            index_size,
            unique_values,
            sample_size,
        }
    }
}

/// Physical index provider
pub trait IndexProvider: Send + Sync {
    /// A fresh populator bound to `descriptor`
    fn populator(
        &self,
        descriptor: &IndexDescriptor,
        sampling: &IndexSamplingConfig,
    ) -> Result<Box<dyn IndexPopulator>>;

    /// The flip target that serves `descriptor` once it is online
    fn online_proxy_factory(&self, descriptor: &IndexDescriptor) -> Arc<dyn IndexProxyFactory>;
}
