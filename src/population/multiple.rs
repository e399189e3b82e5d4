//! Multi-index population
//!
//! Several indexes over the same entity type are built from one store scan.
//! Every scanned entity is read once and handed to each index whose schema
//! it matches. Failures are isolated: one index failing removes it from the
//! active set and flips its proxy to FAILED, the others keep going.
//!
//! Scan vs. live updates: an entity that already has a queued concurrent
//! update for a schema does not contribute its scanned value to that
//! schema. The queued update is applied later and is taken as the newer
//! state of the entity.

use crate::config::PopulationConfig;
use crate::error::FailureCause;
use crate::index::{
    FailedIndexProxyFactory, FlippableIndexProxy, IndexPopulator, IndexUpdater, InternalIndexState,
};
use crate::logging::PopulationLog;
use crate::population::phase::{Phase, PhaseTracker};
use crate::population::queue::{ConcurrentUpdateQueue, UpdateSink};
use crate::scan::{EntityUpdates, IndexStoreView, PopulationProgress, StoreScan};
use crate::schema_state::SchemaState;
use crate::stats::IndexStatisticsStore;
use crate::types::{
    EntityType, IndexDescriptor, IndexEntryUpdate, IndexId, PropertyKeyId, SchemaDescriptor,
    TokenId,
};
use crate::{PopulationError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PopulationStatus {
    Active,
    /// Flipped online and closed
    Completed,
    Failed,
    Dropped,
}

/// One index being built
struct IndexPopulation {
    populator: Box<dyn IndexPopulator>,
    descriptor: IndexDescriptor,
    user_description: String,
    flipper: Arc<FlippableIndexProxy>,
    failed_factory: Arc<dyn FailedIndexProxyFactory>,
    batch: Vec<IndexEntryUpdate>,
    status: PopulationStatus,

    /// `close` was called on the populator
    closed: bool,
}

impl IndexPopulation {
    fn is_active(&self) -> bool {
        self.status == PopulationStatus::Active
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        tracing::trace!(
            index = %self.user_description,
            entries = batch.len(),
            "flushing scan batch"
        );
        self.populator.add(&batch)
    }
}

/// Message handed to `mark_as_failed`
fn failure_message(cause: &FailureCause) -> String {
    format!("Index population failed: {}", cause)
}

/// Updater fanning one update out to every active population of its schema
///
/// Failures are collected per population instead of aborting the fan-out.
pub struct MultipleIndexUpdater {
    updaters: Vec<(usize, IndexDescriptor, Box<dyn IndexUpdater>)>,
    failures: Vec<(usize, FailureCause)>,
}

impl MultipleIndexUpdater {
    fn for_populations(populations: &mut [IndexPopulation]) -> Self {
        let mut updaters = Vec::new();
        let mut failures = Vec::new();
        for (slot, population) in populations.iter_mut().enumerate() {
            if !population.is_active() {
                continue;
            }
            match population.populator.new_populating_updater() {
                Ok(updater) => updaters.push((slot, population.descriptor.clone(), updater)),
                Err(e) => failures.push((slot, e.into_cause())),
            }
        }
        Self { updaters, failures }
    }

    fn has_failed(&self, slot: usize) -> bool {
        self.failures.iter().any(|(s, _)| *s == slot)
    }

    /// Close every updater and hand back the failures
    fn finish(mut self) -> Vec<(usize, FailureCause)> {
        let mut updaters = std::mem::take(&mut self.updaters);
        for (slot, _, updater) in updaters.iter_mut() {
            if self.has_failed(*slot) {
                continue;
            }
            if let Err(e) = updater.close() {
                self.failures.push((*slot, e.into_cause()));
            }
        }
        self.failures
    }
}

impl IndexUpdater for MultipleIndexUpdater {
    fn process(&mut self, update: &IndexEntryUpdate) -> Result<()> {
        for i in 0..self.updaters.len() {
            let slot = self.updaters[i].0;
            if &self.updaters[i].1.schema != update.schema() || self.has_failed(slot) {
                continue;
            }
            if let Err(e) = self.updaters[i].2.process(update) {
                self.failures.push((slot, e.into_cause()));
            }
        }
        Ok(())
    }
}

/// Collaborators of a population
pub struct PopulationContext {
    pub store_view: Arc<dyn IndexStoreView>,
    pub schema_state: Arc<dyn SchemaState>,
    pub statistics: Arc<dyn IndexStatisticsStore>,
    pub log: Arc<dyn PopulationLog>,
}

/// 多索引并行构建：一次扫描，多个索引
pub struct MultipleIndexPopulator {
    store_view: Arc<dyn IndexStoreView>,
    entity_type: EntityType,
    schema_state: Arc<dyn SchemaState>,
    statistics: Arc<dyn IndexStatisticsStore>,
    log: Arc<dyn PopulationLog>,
    config: PopulationConfig,

    populations: Mutex<Vec<IndexPopulation>>,
    queue: ConcurrentUpdateQueue,

    /// Proxy per schema, for routing committed updates without the
    /// populations lock
    routes: DashMap<SchemaDescriptor, Arc<FlippableIndexProxy>>,
    store_scan: Mutex<Option<Arc<dyn StoreScan>>>,
    phases: PhaseTracker,

    stop_requested: AtomicBool,
    closed: AtomicBool,
}

impl MultipleIndexPopulator {
    pub fn new(
        context: PopulationContext,
        entity_type: EntityType,
        config: PopulationConfig,
    ) -> Result<Self> {
        config.validate()?;
        let phases = PhaseTracker::new(context.log.clone(), config.phase_log_period);
        Ok(Self {
            store_view: context.store_view,
            entity_type,
            schema_state: context.schema_state,
            statistics: context.statistics,
            log: context.log,
            config,
            populations: Mutex::new(Vec::new()),
            queue: ConcurrentUpdateQueue::new(),
            routes: DashMap::new(),
            store_scan: Mutex::new(None),
            phases,
            stop_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<dyn PopulationLog> {
        &self.log
    }

    pub fn phases(&self) -> &PhaseTracker {
        &self.phases
    }

    /// Producer handle for the populating proxies
    pub fn update_sink(&self) -> UpdateSink {
        self.queue.sink()
    }

    /// Route one committed update to the index of its schema.
    ///
    /// While the index is populating the update is queued; once it flipped
    /// the online index applies it directly. False once the population is
    /// closed, or when no populating or online index has that schema.
    pub fn queue_update(&self, update: IndexEntryUpdate) -> bool {
        if self.is_closed() {
            return false;
        }
        let flipper = match self.routes.get(update.schema()) {
            Some(route) => route.value().clone(),
            None => return false,
        };
        match flipper.offer(update) {
            Ok(accepted) => accepted,
            Err(e) => {
                self.log.warn(&format!(
                    "Failed to apply update to index [{}]: {}",
                    flipper.descriptor().name,
                    e
                ));
                false
            }
        }
    }

    /// Register one index to build.
    ///
    /// Rejects a second registration of the same index or schema, and
    /// descriptors of the wrong entity type.
    pub fn add_population(
        &self,
        populator: Box<dyn IndexPopulator>,
        descriptor: IndexDescriptor,
        user_description: impl Into<String>,
        flipper: Arc<FlippableIndexProxy>,
        failed_factory: Arc<dyn FailedIndexProxyFactory>,
    ) -> Result<()> {
        if descriptor.entity_type() != self.entity_type {
            return Err(PopulationError::InvalidArgument(format!(
                "cannot populate {} index {} in a {} population",
                descriptor.entity_type(),
                descriptor.name,
                self.entity_type
            )));
        }
        let mut populations = self.populations.lock();
        let duplicate = populations.iter().any(|p| {
            p.is_active()
                && (p.descriptor.id == descriptor.id || p.descriptor.schema == descriptor.schema)
        });
        if duplicate {
            return Err(PopulationError::DuplicatePopulation(descriptor.schema.to_string()));
        }
        self.routes.insert(descriptor.schema.clone(), flipper.clone());
        populations.push(IndexPopulation {
            populator,
            descriptor,
            user_description: user_description.into(),
            flipper,
            failed_factory,
            batch: Vec::with_capacity(self.config.batch_size),
            status: PopulationStatus::Active,
            closed: false,
        });
        Ok(())
    }

    pub fn has_populators(&self) -> bool {
        self.populations.lock().iter().any(|p| p.is_active())
    }

    /// Indexes that ended up FAILED
    pub fn failed_count(&self) -> usize {
        self.populations
            .lock()
            .iter()
            .filter(|p| p.status == PopulationStatus::Failed)
            .count()
    }

    /// Labels of the indexes still being built
    pub fn user_descriptions(&self) -> Vec<String> {
        self.populations
            .lock()
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.user_description.clone())
            .collect()
    }

    /// `create` every populator; the ones that fail are failed individually.
    pub fn create(&self) {
        let mut populations = self.populations.lock();
        for slot in 0..populations.len() {
            if !populations[slot].is_active() {
                continue;
            }
            if let Err(e) = populations[slot].populator.create() {
                self.fail(&mut populations, slot, e.into_cause());
            }
        }
    }

    /// Open the store scan covering every active schema
    pub fn create_store_scan(&self) -> Result<Arc<dyn StoreScan>> {
        let (tokens, keys) = {
            let populations = self.populations.lock();
            let mut tokens: Vec<TokenId> = Vec::new();
            let mut keys: Vec<PropertyKeyId> = Vec::new();
            for population in populations.iter().filter(|p| p.is_active()) {
                let schema = &population.descriptor.schema;
                if !tokens.contains(&schema.entity_token) {
                    tokens.push(schema.entity_token);
                }
                for key in &schema.property_keys {
                    if !keys.contains(key) {
                        keys.push(*key);
                    }
                }
            }
            (tokens, keys)
        };

        let scan = self.store_view.scan(self.entity_type, &tokens, &keys, false)?;
        *self.store_scan.lock() = Some(scan.clone());
        // a cancel that raced with the scan being opened
        if self.stop_requested.load(Ordering::Acquire) {
            scan.stop();
        }
        Ok(scan)
    }

    /// Pull entities until the scan is exhausted, stopped, or fails.
    ///
    /// A scan failure is returned; failing the indexes is up to the caller.
    pub fn run_scan(&self, scan: &dyn StoreScan) -> Result<()> {
        loop {
            self.phases.enter(Phase::Scan);
            let entity = match scan.next_entity()? {
                Some(entity) => entity,
                None => break,
            };

            let mut populations = self.populations.lock();
            self.queue.collect_arrived();
            self.phases.enter(Phase::Write);
            self.visit(&mut populations, &entity);

            if self.queue.pending_len() >= self.config.queue_threshold {
                self.phases.enter(Phase::ApplyExternal);
                self.apply_visited_updates(&mut populations, scan, entity.entity_id)?;
            }

            if !populations.iter().any(|p| p.is_active()) {
                tracing::debug!("no active populations left, stopping scan");
                scan.stop();
            }
        }
        Ok(())
    }

    fn visit(&self, populations: &mut Vec<IndexPopulation>, entity: &EntityUpdates) {
        for slot in 0..populations.len() {
            let population = &mut populations[slot];
            if !population.is_active() {
                continue;
            }
            let update = match entity.index_update(&population.descriptor.schema) {
                Some(update) => update,
                None => continue,
            };
            // a live update for this entity wins over the scanned value
            if self.queue.is_pending_for(entity.entity_id, update.schema()) {
                continue;
            }
            population.populator.include_sample(&update);
            population.batch.push(update);
            if population.batch.len() >= self.config.batch_size {
                if let Err(e) = population.flush() {
                    self.fail(populations, slot, e.into_cause());
                }
            }
        }
    }

    // Updates for entities the scan already passed can go in now; the rest
    // have to wait, or the scan would later overwrite them.
    fn apply_visited_updates(
        &self,
        populations: &mut Vec<IndexPopulation>,
        scan: &dyn StoreScan,
        current_entity_id: u64,
    ) -> Result<()> {
        // batches first, so a queued CHANGE lands on top of the scanned ADD
        self.flush_batches(populations);
        let mut updater = MultipleIndexUpdater::for_populations(populations);
        let applied = self
            .queue
            .apply_where(|queued| {
                scan.accept_update(&mut updater, &queued.update, current_entity_id)
            });
        let failures = updater.finish();
        for (slot, cause) in failures {
            self.fail(populations, slot, cause);
        }
        let applied = applied?;
        tracing::debug!(applied, current_entity_id, "applied queued updates mid-scan");
        Ok(())
    }

    fn flush_batches(&self, populations: &mut Vec<IndexPopulation>) {
        for slot in 0..populations.len() {
            if !populations[slot].is_active() {
                continue;
            }
            if let Err(e) = populations[slot].flush() {
                self.fail(populations, slot, e.into_cause());
            }
        }
    }

    /// Hand the remaining scan batches to their populators
    pub fn flush_all(&self) {
        self.phases.enter(Phase::Write);
        let mut populations = self.populations.lock();
        self.flush_batches(&mut populations);
    }

    /// Apply every queued update until the queue is empty
    pub fn populate_from_queue(&self) -> usize {
        self.phases.enter(Phase::ApplyExternal);
        let mut populations = self.populations.lock();
        let (applied, _) = self.drain_queue(&mut populations, None);
        applied
    }

    /// Drain the queue through a fan-out updater until nothing is left.
    ///
    /// A failure of the `deferred` population is handed back instead of
    /// being handled here, because its proxy is locked by the caller.
    fn drain_queue(
        &self,
        populations: &mut Vec<IndexPopulation>,
        deferred: Option<usize>,
    ) -> (usize, Option<FailureCause>) {
        let mut applied = 0;
        loop {
            let pending = self.queue.take_all();
            if pending.is_empty() {
                return (applied, None);
            }
            let mut updater = MultipleIndexUpdater::for_populations(populations);
            for queued in &pending {
                // fan-out collects failures, never errors itself
                let _ = updater.process(&queued.update);
            }
            applied += pending.len();

            let mut own_failure = None;
            for (slot, cause) in updater.finish() {
                if Some(slot) == deferred {
                    own_failure.get_or_insert(cause);
                } else {
                    self.fail(populations, slot, cause);
                }
            }
            if own_failure.is_some() {
                return (applied, own_failure);
            }
        }
    }

    /// Flip every population that is still active.
    ///
    /// Per index, under the proxy's write lock: final queue drain, optional
    /// constraint verification, sampling, `close(true)`, schema state
    /// invalidation. Returns the indexes that went online.
    pub fn flip_after_population(&self) -> Vec<IndexDescriptor> {
        let mut flipped = Vec::new();
        let mut populations = self.populations.lock();

        for slot in 0..populations.len() {
            if !populations[slot].is_active() {
                continue;
            }
            self.phases.enter(Phase::Flip);
            let flipper = populations[slot].flipper.clone();
            let failed_factory = populations[slot].failed_factory.clone();

            let result = flipper.flip(
                || self.complete_population(&mut populations, slot),
                failed_factory.as_ref(),
            );
            match result {
                Ok(true) => {
                    let population = &populations[slot];
                    let state = population.flipper.state();
                    if population.descriptor.unique && state != InternalIndexState::Online {
                        self.log.info(&format!(
                            "Index created. Starting data checks. Index [{}] is {}.",
                            population.user_description, state
                        ));
                    } else {
                        self.log.info(&format!(
                            "Index creation finished. Index [{}] is {}.",
                            population.user_description, state
                        ));
                    }
                    flipped.push(population.descriptor.clone());
                }
                Ok(false) => {}
                Err(cause) => self.fail(&mut populations, slot, cause),
            }
        }
        flipped
    }

    fn complete_population(
        &self,
        populations: &mut Vec<IndexPopulation>,
        slot: usize,
    ) -> std::result::Result<bool, FailureCause> {
        let (_, own_failure) = self.drain_queue(populations, Some(slot));
        if let Some(cause) = own_failure {
            return Err(cause);
        }

        let population = &mut populations[slot];
        if !population.is_active() {
            return Ok(false);
        }
        if self.config.verify_before_flipping && population.descriptor.unique {
            population
                .populator
                .verify_deferred_constraints()
                .map_err(PopulationError::into_cause)?;
        }
        self.record_sample(population);
        population
            .populator
            .close(true)
            .map_err(PopulationError::into_cause)?;
        population.closed = true;
        population.status = PopulationStatus::Completed;

        if let Err(e) = self.schema_state.clear() {
            self.log.warn(&format!("Failed to clear schema state: {}", e));
        }
        Ok(true)
    }

    // Statistics are advisory, a failure here does not fail the index.
    fn record_sample(&self, population: &mut IndexPopulation) {
        let sample = match population.populator.sample_result() {
            Ok(sample) => sample,
            Err(e) => {
                self.log.warn(&format!(
                    "Failed to sample index [{}]: {}",
                    population.user_description, e
                ));
                return;
            }
        };
        if let Err(e) = self.statistics.replace_stats(population.descriptor.id, &sample) {
            self.log.warn(&format!(
                "Failed to store statistics for index [{}]: {}",
                population.user_description, e
            ));
        }
    }

    /// Take one population out of the active set and flip it to FAILED
    fn fail(&self, populations: &mut [IndexPopulation], slot: usize, cause: FailureCause) {
        let population = &mut populations[slot];
        if !population.is_active() {
            return;
        }
        population.status = PopulationStatus::Failed;
        population.batch.clear();

        self.log.error(
            &format!("Failed to populate index: [{}]", population.user_description),
            &cause,
        );
        population.populator.mark_as_failed(&failure_message(&cause));
        if !population.closed {
            population.closed = true;
            if let Err(e) = population.populator.close(false) {
                self.log.warn(&format!(
                    "Failed to close populator for index [{}]: {}",
                    population.user_description, e
                ));
            }
        }
        population
            .flipper
            .flip_to_failed(population.failed_factory.as_ref(), cause);
    }

    /// Fail every active population with the same cause
    pub fn fail_all(&self, cause: FailureCause) {
        let mut populations = self.populations.lock();
        for slot in 0..populations.len() {
            self.fail(&mut populations, slot, cause.clone());
        }
    }

    /// Stop building one index; returns false if it wasn't being built.
    ///
    /// Its populator is closed unsuccessfully and its proxy is not flipped.
    /// The scan stops once nothing is left to build.
    pub fn drop_population(&self, index_id: IndexId) -> bool {
        let mut populations = self.populations.lock();
        let population = match populations
            .iter_mut()
            .find(|p| p.is_active() && p.descriptor.id == index_id)
        {
            Some(population) => population,
            None => return false,
        };

        population.status = PopulationStatus::Dropped;
        population.batch.clear();
        let flipper = population.flipper.clone();
        self.routes
            .remove_if(&population.descriptor.schema, |_, route| Arc::ptr_eq(route, &flipper));
        if !population.closed {
            population.closed = true;
            if let Err(e) = population.populator.close(false) {
                self.log.warn(&format!(
                    "Failed to close populator for index [{}]: {}",
                    population.user_description, e
                ));
            }
        }
        tracing::debug!(index = %population.user_description, "index population dropped");

        if !populations.iter().any(|p| p.is_active()) {
            if let Some(scan) = self.store_scan.lock().as_ref() {
                scan.stop();
            }
        }
        true
    }

    /// Stop the scan; safe before the scan exists
    pub fn cancel(&self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(scan) = self.store_scan.lock().as_ref() {
            scan.stop();
        }
    }

    /// Close every populator not closed yet, exactly once.
    ///
    /// With `success`, remaining active populations are sampled and closed
    /// successfully; otherwise they are discarded. The queue stops
    /// accepting updates.
    pub fn close(&self, success: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        let mut populations = self.populations.lock();
        for slot in 0..populations.len() {
            if populations[slot].closed {
                continue;
            }
            if success && populations[slot].is_active() {
                self.record_sample(&mut populations[slot]);
                match populations[slot].populator.close(true) {
                    Ok(()) => {
                        populations[slot].closed = true;
                        populations[slot].status = PopulationStatus::Completed;
                    }
                    Err(e) => self.fail(&mut populations, slot, e.into_cause()),
                }
            } else {
                let population = &mut populations[slot];
                population.closed = true;
                population.batch.clear();
                if let Err(e) = population.populator.close(false) {
                    self.log.warn(&format!(
                        "Failed to close populator for index [{}]: {}",
                        population.user_description, e
                    ));
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Progress of the running scan, NONE before it started
    pub fn progress(&self) -> PopulationProgress {
        self.store_scan
            .lock()
            .as_ref()
            .map_or(PopulationProgress::NONE, |scan| scan.progress())
    }

    /// Pending concurrent updates
    pub fn queued_updates(&self) -> usize {
        self.queue.pending_len()
    }
}
