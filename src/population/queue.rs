//! Concurrent update queue
//!
//! Transaction threads push committed updates for indexes that are still
//! populating; the population job is the only consumer. Producers never
//! block: a push is one channel send. The consumer moves arrived updates
//! into a pending log and keeps an entity → schemas lookup on the side so
//! the scan can ask "does this entity already have a live update?" while
//! it visits entities.

use crate::types::{EntityId, IndexEntryUpdate, SchemaDescriptor};
use crate::Result;
use ahash::{AHashMap, AHashSet};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// An update waiting to be applied
#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    /// Arrival sequence number, unique per queue
    pub seq: u64,

    /// When the producer handed it over
    pub observed_at: Instant,

    pub update: IndexEntryUpdate,
}

/// Producer handle, cheap to clone
#[derive(Debug, Clone)]
pub struct UpdateSink {
    sender: Sender<QueuedUpdate>,
    seq: Arc<AtomicU64>,
    accepting: Arc<AtomicBool>,
}

impl UpdateSink {
    /// Enqueue without blocking; returns false once the queue is closed.
    pub fn push(&self, update: IndexEntryUpdate) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        let queued = QueuedUpdate {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            observed_at: Instant::now(),
            update,
        };
        self.sender.send(queued).is_ok()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

/// Arrived, not yet applied
#[derive(Default)]
struct PendingUpdates {
    log: VecDeque<QueuedUpdate>,
    by_entity: AHashMap<EntityId, Vec<SchemaDescriptor>>,
}

impl PendingUpdates {
    fn push(&mut self, queued: QueuedUpdate) {
        let schemas = self.by_entity.entry(queued.update.entity_id()).or_default();
        if !schemas.contains(queued.update.schema()) {
            schemas.push(queued.update.schema().clone());
        }
        self.log.push_back(queued);
    }

    fn rebuild_lookup(&mut self) {
        self.by_entity.clear();
        for queued in &self.log {
            let schemas = self.by_entity.entry(queued.update.entity_id()).or_default();
            if !schemas.contains(queued.update.schema()) {
                schemas.push(queued.update.schema().clone());
            }
        }
    }
}

/// 并发更新队列：多生产者，单消费者（population job）
pub struct ConcurrentUpdateQueue {
    sink: UpdateSink,
    receiver: Receiver<QueuedUpdate>,
    pending: Mutex<PendingUpdates>,
}

impl Default for ConcurrentUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentUpdateQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sink: UpdateSink {
                sender,
                seq: Arc::new(AtomicU64::new(0)),
                accepting: Arc::new(AtomicBool::new(true)),
            },
            receiver,
            pending: Mutex::new(PendingUpdates::default()),
        }
    }

    pub fn sink(&self) -> UpdateSink {
        self.sink.clone()
    }

    pub fn push(&self, update: IndexEntryUpdate) -> bool {
        self.sink.push(update)
    }

    /// Stop accepting; later pushes are dropped
    pub fn close(&self) {
        self.sink.accepting.store(false, Ordering::Release);
    }

    fn collect(&self, pending: &mut PendingUpdates) -> usize {
        let mut moved = 0;
        while let Ok(queued) = self.receiver.try_recv() {
            pending.push(queued);
            moved += 1;
        }
        moved
    }

    /// Move everything that has arrived into the pending log
    pub fn collect_arrived(&self) -> usize {
        let mut pending = self.pending.lock();
        self.collect(&mut pending)
    }

    /// Arrived updates not yet applied
    pub fn pending_len(&self) -> usize {
        let mut pending = self.pending.lock();
        self.collect(&mut pending);
        pending.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Whether a live update for `entity` under `schema` is pending.
    ///
    /// Only looks at what was collected already.
    pub fn is_pending_for(&self, entity: EntityId, schema: &SchemaDescriptor) -> bool {
        self.pending
            .lock()
            .by_entity
            .get(&entity)
            .map_or(false, |schemas| schemas.contains(schema))
    }

    /// Take every pending update, in arrival order
    pub fn take_all(&self) -> Vec<QueuedUpdate> {
        let mut pending = self.pending.lock();
        self.collect(&mut pending);
        pending.by_entity.clear();
        pending.log.drain(..).collect()
    }

    /// Offer pending updates to `apply` in arrival order; the ones it
    /// accepts are removed.
    ///
    /// Once an entity has an update left behind, its later updates are
    /// left behind too, so per-entity order survives.
    pub fn apply_where<F>(&self, mut apply: F) -> Result<usize>
    where
        F: FnMut(&QueuedUpdate) -> Result<bool>,
    {
        let mut pending = self.pending.lock();
        self.collect(&mut pending);

        let mut kept = VecDeque::with_capacity(pending.log.len());
        let mut blocked: AHashSet<EntityId> = AHashSet::new();
        let mut applied = 0;
        let mut result = Ok(());

        while let Some(queued) = pending.log.pop_front() {
            let entity = queued.update.entity_id();
            if result.is_err() || blocked.contains(&entity) {
                kept.push_back(queued);
                continue;
            }
            match apply(&queued) {
                Ok(true) => applied += 1,
                Ok(false) => {
                    blocked.insert(entity);
                    kept.push_back(queued);
                }
                Err(e) => {
                    result = Err(e);
                    kept.push_back(queued);
                }
            }
        }

        pending.log = kept;
        pending.rebuild_lookup();
        result.map(|_| applied)
    }
}
