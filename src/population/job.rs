//! Index population job
//!
//! Drives one `MultipleIndexPopulator` from start to a terminal outcome on
//! a single worker thread:
//!
//! ```text
//! IDLE → SCANNING → RECONCILING → FLIPPING → FLIPPED_ONLINE
//!                                          → FLIPPED_FAILED
//!   └──────────┴──────────┴────→ CANCELLING → CANCELLED
//! ```
//!
//! Cancellation is honored up to the end of reconciliation. Once FLIPPING,
//! every remaining index is flipped and `cancel()` has no effect.
//!
//! `run()` never returns an error. Per-index outcomes are visible through
//! the proxies and the log; the job state summarizes them. Transaction
//! threads feed concurrent updates through `update()` at any time.

use crate::index::{
    DefaultFailedIndexProxyFactory, FailedIndexProxyFactory, FlippableIndexProxy, IndexPopulator,
    IndexProvider, IndexProxy,
};
use crate::population::multiple::MultipleIndexPopulator;
use crate::population::queue::UpdateSink;
use crate::scan::PopulationProgress;
use crate::types::{IndexDescriptor, IndexEntryUpdate, IndexId};
use crate::{PopulationError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Scanning = 1,
    Reconciling = 2,
    /// Flipping proxies; no longer cancellable
    Flipping = 3,
    /// At least one index went online (or there was nothing to build)
    FlippedOnline = 4,
    /// Every index failed
    FlippedFailed = 5,
    Cancelling = 6,
    Cancelled = 7,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Idle,
            1 => JobState::Scanning,
            2 => JobState::Reconciling,
            3 => JobState::Flipping,
            4 => JobState::FlippedOnline,
            5 => JobState::FlippedFailed,
            6 => JobState::Cancelling,
            _ => JobState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::FlippedOnline | JobState::FlippedFailed | JobState::Cancelled)
    }

    fn is_cancellable(self) -> bool {
        matches!(self, JobState::Idle | JobState::Scanning | JobState::Reconciling)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "IDLE",
            JobState::Scanning => "SCANNING",
            JobState::Reconciling => "RECONCILING",
            JobState::Flipping => "FLIPPING",
            JobState::FlippedOnline => "FLIPPED_ONLINE",
            JobState::FlippedFailed => "FLIPPED_FAILED",
            JobState::Cancelling => "CANCELLING",
            JobState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}

/// Cancellable handle given out by whoever schedules the job
pub trait JobHandle: Send + Sync {
    fn cancel(&self);
}

/// Lifecycle hooks, all no-ops by default
pub trait PopulationMonitor: Send + Sync {
    fn scan_starting(&self) {}

    fn scan_complete(&self) {}

    fn population_complete_on(&self, _descriptor: &IndexDescriptor) {}

    fn population_cancelled(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoMonitor;

impl PopulationMonitor for NoMonitor {}

/// 索引构建任务
pub struct IndexPopulationJob {
    multi: MultipleIndexPopulator,
    monitor: Arc<dyn PopulationMonitor>,

    state: AtomicU8,
    ran: AtomicBool,
    cancelled: AtomicBool,
    handle: Mutex<Option<Arc<dyn JobHandle>>>,

    done: Mutex<bool>,
    done_cond: Condvar,
}

impl IndexPopulationJob {
    pub fn new(multi: MultipleIndexPopulator, monitor: Arc<dyn PopulationMonitor>) -> Self {
        Self {
            multi,
            monitor,
            state: AtomicU8::new(JobState::Idle as u8),
            ran: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            handle: Mutex::new(None),
            done: Mutex::new(false),
            done_cond: Condvar::new(),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: JobState, to: JobState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn populator(&self) -> &MultipleIndexPopulator {
        &self.multi
    }

    /// Register one index before `run()`
    pub fn add_populator(
        &self,
        populator: Box<dyn IndexPopulator>,
        descriptor: IndexDescriptor,
        user_description: impl Into<String>,
        flipper: Arc<FlippableIndexProxy>,
        failed_factory: Arc<dyn FailedIndexProxyFactory>,
    ) -> Result<()> {
        if self.ran.load(Ordering::Acquire) || self.state() != JobState::Idle {
            return Err(PopulationError::IllegalState(format!(
                "cannot add index {} to a job in state {}",
                descriptor.name,
                self.state()
            )));
        }
        self.multi
            .add_population(populator, descriptor, user_description, flipper, failed_factory)
    }

    /// Register an index built by `provider`, returning its populating proxy
    pub fn add_index(
        &self,
        provider: &dyn IndexProvider,
        descriptor: IndexDescriptor,
        user_description: impl Into<String>,
    ) -> Result<Arc<FlippableIndexProxy>> {
        let populator = provider.populator(&descriptor, &self.multi.config().sampling)?;
        let flipper = Arc::new(FlippableIndexProxy::new(IndexProxy::populating(
            descriptor.clone(),
            self.update_sink(),
        )));
        flipper.set_flip_target(provider.online_proxy_factory(&descriptor));
        self.add_populator(
            populator,
            descriptor.clone(),
            user_description,
            flipper.clone(),
            Arc::new(DefaultFailedIndexProxyFactory::new(descriptor)),
        )?;
        Ok(flipper)
    }

    pub fn set_handle(&self, handle: Arc<dyn JobHandle>) {
        *self.handle.lock() = Some(handle);
    }

    /// Build every registered index. Runs once; never fails.
    pub fn run(&self) {
        if self.ran.swap(true, Ordering::AcqRel) {
            self.multi.log().warn("Index population job has already been run");
            return;
        }

        let outcome = self.populate();
        if outcome == JobState::Cancelled {
            self.multi.close(false);
            self.monitor.population_cancelled();
        } else {
            self.multi.close(outcome == JobState::FlippedOnline);
        }
        self.multi.phases().stop();
        self.state.store(outcome as u8, Ordering::Release);
        tracing::debug!(state = %outcome, "index population job finished");

        let mut done = self.done.lock();
        *done = true;
        self.done_cond.notify_all();
    }

    fn populate(&self) -> JobState {
        if !self.transition(JobState::Idle, JobState::Scanning) {
            return JobState::Cancelled;
        }

        self.multi.create();
        for label in self.multi.user_descriptions() {
            self.multi.log().info(&format!("Index population started: [{}]", label));
        }

        if self.multi.has_populators() {
            self.monitor.scan_starting();
            let scanned = self
                .multi
                .create_store_scan()
                .and_then(|scan| self.multi.run_scan(scan.as_ref()));
            if self.is_cancelled() {
                return JobState::Cancelled;
            }
            if let Err(e) = scanned {
                // 扫描失败：所有索引一起失败
                self.multi.fail_all(e.into_cause());
                return self.finish(JobState::Scanning, JobState::FlippedFailed);
            }
            self.monitor.scan_complete();
        }

        if !self.transition(JobState::Scanning, JobState::Reconciling) {
            return JobState::Cancelled;
        }
        self.multi.flush_all();
        let applied = self.multi.populate_from_queue();
        tracing::debug!(applied, "reconciled queued updates after scan");
        if !self.transition(JobState::Reconciling, JobState::Flipping) {
            return JobState::Cancelled;
        }

        let flipped = self.multi.flip_after_population();
        for descriptor in &flipped {
            self.monitor.population_complete_on(descriptor);
        }

        let outcome = if flipped.is_empty() && self.multi.failed_count() > 0 {
            JobState::FlippedFailed
        } else {
            JobState::FlippedOnline
        };
        self.finish(JobState::Flipping, outcome)
    }

    fn finish(&self, from: JobState, outcome: JobState) -> JobState {
        if self.transition(from, outcome) {
            outcome
        } else {
            JobState::Cancelled
        }
    }

    /// Cooperative cancel: stop the scan, forward to the handle once.
    ///
    /// No effect once the job started flipping.
    pub fn cancel(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !JobState::from_u8(current).is_cancellable() {
                return;
            }
            match self.state.compare_exchange(
                current,
                JobState::Cancelling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.cancelled.store(true, Ordering::Release);
        self.multi.cancel();
        let handle = self.handle.lock().clone();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Block until `run()` finished or `timeout` elapsed; true if finished.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.done_cond.wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }

    /// Hand a committed update to the index of its schema.
    ///
    /// Queued while that index is populating, applied directly once it is
    /// online. False after the job closed or when no such index exists.
    pub fn update(&self, update: IndexEntryUpdate) -> bool {
        self.multi.queue_update(update)
    }

    pub fn update_sink(&self) -> UpdateSink {
        self.multi.update_sink()
    }

    /// Stop building one index; the others continue
    pub fn drop_population(&self, index_id: IndexId) -> bool {
        self.multi.drop_population(index_id)
    }

    pub fn progress(&self) -> PopulationProgress {
        if self.state().is_terminal() {
            return PopulationProgress::DONE;
        }
        self.multi.progress()
    }
}

impl fmt::Debug for IndexPopulationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexPopulationJob")
            .field("state", &self.state())
            .field("indexes", &self.multi.user_descriptions())
            .finish()
    }
}
