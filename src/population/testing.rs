//! Test doubles for the population engine
//!
//! Explicit fakes with their call history exposed directly: a populator
//! that records every call, a log that keeps its records, a scan that
//! blocks until stopped, a store view whose scan fails, and counters for
//! the failed-proxy factory and job handle.

use crate::error::FailureCause;
use crate::index::{
    FailedIndexProxyFactory, IndexAccessor, IndexPopulator, IndexProxy, IndexProxyFactory,
    IndexSample, IndexUpdater, OnlineIndexProxyFactory,
};
use crate::logging::PopulationLog;
use crate::population::job::{JobHandle, PopulationMonitor};
use crate::scan::{EntityUpdates, IndexStoreView, PopulationProgress, StoreScan};
use crate::types::{
    EntityId, EntityType, IndexDescriptor, IndexEntryUpdate, PropertyKeyId, TokenId, UpdateMode,
    Value,
};
use crate::{PopulationError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything a `RecordingPopulator` was asked to do
#[derive(Debug, Default)]
pub struct PopulatorCalls {
    pub creates: usize,
    pub add_batches: Vec<Vec<IndexEntryUpdate>>,
    pub included_samples: Vec<IndexEntryUpdate>,
    pub sample_results: usize,
    pub verifications: usize,
    pub processed: Vec<IndexEntryUpdate>,
    pub failures: Vec<String>,
    pub closes: Vec<bool>,

    /// Resulting index content
    pub entries: BTreeMap<EntityId, Vec<Value>>,
}

fn apply(entries: &mut BTreeMap<EntityId, Vec<Value>>, update: &IndexEntryUpdate) {
    match update.mode() {
        UpdateMode::Added | UpdateMode::Changed => {
            entries.insert(update.entity_id(), update.values().to_vec());
        }
        UpdateMode::Removed => {
            entries.remove(&update.entity_id());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Nothing,
    Create,
    Add,
    Process,
    SampleResult,
    Verify,
    CloseSuccessfully,
}

pub type AddHook = Box<dyn FnMut(&IndexEntryUpdate) + Send>;
pub type CloseHook = Box<dyn FnMut(bool) + Send>;

/// Populator recording every call into shared `PopulatorCalls`
pub struct RecordingPopulator {
    calls: Arc<Mutex<PopulatorCalls>>,
    fail_on: FailOn,
    on_add: Option<AddHook>,
    on_close: Option<CloseHook>,
}

impl RecordingPopulator {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(PopulatorCalls::default())),
            fail_on: FailOn::Nothing,
            on_add: None,
            on_close: None,
        }
    }

    pub fn failing_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = fail_on;
        self
    }

    /// Run `hook` for every entry handed to `add`
    pub fn on_add(mut self, hook: impl FnMut(&IndexEntryUpdate) + Send + 'static) -> Self {
        self.on_add = Some(Box::new(hook));
        self
    }

    /// Run `hook` on every `close`, after it was recorded
    pub fn on_close(mut self, hook: impl FnMut(bool) + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Arc<Mutex<PopulatorCalls>> {
        self.calls.clone()
    }

    /// Online target reading from the recorded entries
    pub fn online_target(&self, descriptor: &IndexDescriptor) -> Arc<dyn IndexProxyFactory> {
        Arc::new(OnlineIndexProxyFactory::new(
            descriptor.clone(),
            Arc::new(RecordingAccessor {
                calls: self.calls.clone(),
            }),
        ))
    }

    fn failure(&self, fail_on: FailOn, message: &str) -> Result<()> {
        if self.fail_on == fail_on {
            return Err(PopulationError::Populator(message.to_string()));
        }
        Ok(())
    }
}

impl IndexPopulator for RecordingPopulator {
    fn create(&mut self) -> Result<()> {
        self.calls.lock().creates += 1;
        self.failure(FailOn::Create, "not successful")
    }

    fn add(&mut self, updates: &[IndexEntryUpdate]) -> Result<()> {
        {
            let mut calls = self.calls.lock();
            calls.add_batches.push(updates.to_vec());
        }
        self.failure(FailOn::Add, "add failed")?;
        if let Some(hook) = self.on_add.as_mut() {
            for update in updates {
                hook(update);
            }
        }
        let mut calls = self.calls.lock();
        for update in updates {
            apply(&mut calls.entries, update);
        }
        Ok(())
    }

    fn verify_deferred_constraints(&mut self) -> Result<()> {
        self.calls.lock().verifications += 1;
        if self.fail_on == FailOn::Verify {
            return Err(PopulationError::EntryConflict("duplicate value".to_string()));
        }
        Ok(())
    }

    fn new_populating_updater(&mut self) -> Result<Box<dyn IndexUpdater>> {
        Ok(Box::new(RecordingUpdater {
            calls: self.calls.clone(),
            fail: self.fail_on == FailOn::Process,
        }))
    }

    fn include_sample(&mut self, update: &IndexEntryUpdate) {
        self.calls.lock().included_samples.push(update.clone());
    }

    fn sample_result(&mut self) -> Result<IndexSample> {
        let mut calls = self.calls.lock();
        calls.sample_results += 1;
        if self.fail_on == FailOn::SampleResult {
            return Err(PopulationError::Statistics("sampling failed".to_string()));
        }
        let size = calls.entries.len() as u64;
        Ok(IndexSample::new(size, size, calls.included_samples.len() as u64))
    }

    fn mark_as_failed(&mut self, failure: &str) {
        self.calls.lock().failures.push(failure.to_string());
    }

    fn close(&mut self, population_completed_successfully: bool) -> Result<()> {
        self.calls.lock().closes.push(population_completed_successfully);
        if let Some(hook) = self.on_close.as_mut() {
            hook(population_completed_successfully);
        }
        if population_completed_successfully {
            self.failure(FailOn::CloseSuccessfully, "close failed")?;
        }
        Ok(())
    }
}

struct RecordingUpdater {
    calls: Arc<Mutex<PopulatorCalls>>,
    fail: bool,
}

impl IndexUpdater for RecordingUpdater {
    fn process(&mut self, update: &IndexEntryUpdate) -> Result<()> {
        if self.fail {
            return Err(PopulationError::Populator("process failed".to_string()));
        }
        let mut calls = self.calls.lock();
        calls.processed.push(update.clone());
        apply(&mut calls.entries, update);
        Ok(())
    }
}

struct RecordingAccessor {
    calls: Arc<Mutex<PopulatorCalls>>,
}

impl IndexAccessor for RecordingAccessor {
    fn apply(&self, update: &IndexEntryUpdate) -> Result<()> {
        apply(&mut self.calls.lock().entries, update);
        Ok(())
    }

    fn entity_count(&self) -> usize {
        self.calls.lock().entries.len()
    }
}

#[derive(Debug, Clone)]
pub enum LogRecord {
    Info(String),
    Warn(String),
    Error(String, FailureCause),
}

/// Log keeping every record for assertions
#[derive(Debug, Default)]
pub struct AssertableLog {
    records: Mutex<Vec<LogRecord>>,
}

impl AssertableLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Info(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warns(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Warn(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, FailureCause)> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Error(m, c) => Some((m.clone(), c.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn has_info(&self, message: &str) -> bool {
        self.infos().iter().any(|m| m == message)
    }
}

impl PopulationLog for AssertableLog {
    fn info(&self, message: &str) {
        self.records.lock().push(LogRecord::Info(message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.records.lock().push(LogRecord::Warn(message.to_string()));
    }

    fn error(&self, message: &str, cause: &FailureCause) {
        self.records
            .lock()
            .push(LogRecord::Error(message.to_string(), cause.clone()));
    }
}

/// Scan that blocks in `next_entity` until stopped
#[derive(Default)]
pub struct ControlledStoreScan {
    started: Mutex<bool>,
    started_cond: Condvar,
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
    stops: AtomicUsize,
}

impl ControlledStoreScan {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until the scan is blocked inside `next_entity`
    pub fn await_started(&self, timeout: Duration) -> bool {
        let mut started = self.started.lock();
        self.started_cond
            .wait_while_for(&mut started, |started| !*started, timeout);
        *started
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl StoreScan for ControlledStoreScan {
    fn next_entity(&self) -> Result<Option<EntityUpdates>> {
        {
            let mut started = self.started.lock();
            *started = true;
            self.started_cond.notify_all();
        }
        let mut stopped = self.stopped.lock();
        while !*stopped {
            self.stopped_cond.wait(&mut stopped);
        }
        Ok(None)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.stopped_cond.notify_all();
    }

    fn progress(&self) -> PopulationProgress {
        PopulationProgress::NONE
    }
}

/// Store view handing out one `ControlledStoreScan`
pub struct ControlledStoreView {
    scan: Arc<ControlledStoreScan>,
}

impl ControlledStoreView {
    pub fn new(scan: Arc<ControlledStoreScan>) -> Self {
        Self { scan }
    }
}

impl IndexStoreView for ControlledStoreView {
    fn scan(
        &self,
        _entity_type: EntityType,
        _token_ids: &[TokenId],
        _property_keys: &[PropertyKeyId],
        _force_full_scan: bool,
    ) -> Result<Arc<dyn StoreScan>> {
        Ok(self.scan.clone())
    }
}

/// Store view whose scans fail on the first pull
pub struct FailingStoreView {
    message: String,
}

impl FailingStoreView {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

struct FailingScan {
    message: String,
}

impl StoreScan for FailingScan {
    fn next_entity(&self) -> Result<Option<EntityUpdates>> {
        Err(PopulationError::Scan(self.message.clone()))
    }

    fn stop(&self) {}

    fn progress(&self) -> PopulationProgress {
        PopulationProgress::NONE
    }
}

impl IndexStoreView for FailingStoreView {
    fn scan(
        &self,
        _entity_type: EntityType,
        _token_ids: &[TokenId],
        _property_keys: &[PropertyKeyId],
        _force_full_scan: bool,
    ) -> Result<Arc<dyn StoreScan>> {
        Ok(Arc::new(FailingScan {
            message: self.message.clone(),
        }))
    }
}

/// Failed-proxy factory counting `create` calls
pub struct CountingFailedProxyFactory {
    descriptor: IndexDescriptor,
    created: AtomicUsize,
}

impl CountingFailedProxyFactory {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            created: AtomicUsize::new(0),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl FailedIndexProxyFactory for CountingFailedProxyFactory {
    fn create(&self, cause: FailureCause) -> IndexProxy {
        self.created.fetch_add(1, Ordering::SeqCst);
        IndexProxy::failed(self.descriptor.clone(), cause)
    }
}

/// Job handle counting cancellations
#[derive(Default)]
pub struct RecordingJobHandle {
    cancels: AtomicUsize,
}

impl RecordingJobHandle {
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl JobHandle for RecordingJobHandle {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Monitor recording hook calls by name
#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<String>>,
}

impl RecordingMonitor {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl PopulationMonitor for RecordingMonitor {
    fn scan_starting(&self) {
        self.events.lock().push("scan_starting".to_string());
    }

    fn scan_complete(&self) {
        self.events.lock().push("scan_complete".to_string());
    }

    fn population_complete_on(&self, descriptor: &IndexDescriptor) {
        self.events.lock().push(format!("complete:{}", descriptor.id));
    }

    fn population_cancelled(&self) {
        self.events.lock().push("cancelled".to_string());
    }
}
