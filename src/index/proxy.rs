//! Index proxies
//!
//! What the rest of the database talks to while an index is being built.
//! A `FlippableIndexProxy` wraps exactly one delegate at a time and swaps
//! it atomically: populating → online, or populating → failed. Updates
//! take the read side of the swap lock, the flip takes the write side, so
//! no update is ever applied to a delegate that is being replaced.

use crate::error::FailureCause;
use crate::index::populator::IndexAccessor;
use crate::population::UpdateSink;
use crate::types::{IndexDescriptor, IndexEntryUpdate};
use crate::{PopulationError, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Externally observable index state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalIndexState {
    Populating,
    Online,
    Failed,
}

impl fmt::Display for InternalIndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalIndexState::Populating => write!(f, "POPULATING"),
            InternalIndexState::Online => write!(f, "ONLINE"),
            InternalIndexState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Delegate behind a flippable proxy
///
/// Only buildable through `populating` / `online` / `failed`.
pub enum IndexProxy {
    Populating(PopulatingIndexProxy),
    Online(OnlineIndexProxy),
    Failed(FailedIndexProxy),
}

/// Routes updates into the population's queue
pub struct PopulatingIndexProxy {
    descriptor: IndexDescriptor,
    updates: UpdateSink,
}

/// Serves a built index
pub struct OnlineIndexProxy {
    descriptor: IndexDescriptor,
    accessor: Arc<dyn IndexAccessor>,

    /// Constraint-backing indexes report POPULATING until activated
    awaiting_activation: AtomicBool,
}

/// Terminal failure, holding the cause
pub struct FailedIndexProxy {
    descriptor: IndexDescriptor,
    cause: FailureCause,
}

impl IndexProxy {
    pub fn populating(descriptor: IndexDescriptor, updates: UpdateSink) -> Self {
        IndexProxy::Populating(PopulatingIndexProxy { descriptor, updates })
    }

    pub fn online(descriptor: IndexDescriptor, accessor: Arc<dyn IndexAccessor>) -> Self {
        let awaiting_activation = AtomicBool::new(descriptor.unique);
        IndexProxy::Online(OnlineIndexProxy {
            descriptor,
            accessor,
            awaiting_activation,
        })
    }

    pub fn failed(descriptor: IndexDescriptor, cause: FailureCause) -> Self {
        IndexProxy::Failed(FailedIndexProxy { descriptor, cause })
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        match self {
            IndexProxy::Populating(p) => &p.descriptor,
            IndexProxy::Online(p) => &p.descriptor,
            IndexProxy::Failed(p) => &p.descriptor,
        }
    }

    pub fn state(&self) -> InternalIndexState {
        match self {
            IndexProxy::Populating(_) => InternalIndexState::Populating,
            IndexProxy::Online(p) if p.awaiting_activation.load(Ordering::Acquire) => {
                InternalIndexState::Populating
            }
            IndexProxy::Online(_) => InternalIndexState::Online,
            IndexProxy::Failed(_) => InternalIndexState::Failed,
        }
    }

    /// Apply or enqueue one committed update
    ///
    /// A failed index ignores updates.
    pub fn update(&self, update: IndexEntryUpdate) -> Result<()> {
        self.accept(update).map(|_| ())
    }

    /// Like `update`, reporting whether the update was taken.
    ///
    /// False when the population queue is closed or the index failed.
    pub fn accept(&self, update: IndexEntryUpdate) -> Result<bool> {
        match self {
            IndexProxy::Populating(p) => Ok(p.updates.push(update)),
            IndexProxy::Online(p) => p.accessor.apply(&update).map(|_| true),
            IndexProxy::Failed(_) => Ok(false),
        }
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match self {
            IndexProxy::Failed(p) => Some(&p.cause),
            _ => None,
        }
    }

    /// Number of indexed entities, if the index is online
    pub fn entity_count(&self) -> Option<usize> {
        match self {
            IndexProxy::Online(p) => Some(p.accessor.entity_count()),
            _ => None,
        }
    }
}

impl fmt::Debug for IndexProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexProxy")
            .field("index", &self.descriptor().name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builds the online delegate at flip time
pub trait IndexProxyFactory: Send + Sync {
    fn create(&self) -> Result<IndexProxy>;
}

/// Online target over an accessor that already exists
pub struct OnlineIndexProxyFactory {
    descriptor: IndexDescriptor,
    accessor: Arc<dyn IndexAccessor>,
}

impl OnlineIndexProxyFactory {
    pub fn new(descriptor: IndexDescriptor, accessor: Arc<dyn IndexAccessor>) -> Self {
        Self { descriptor, accessor }
    }
}

impl IndexProxyFactory for OnlineIndexProxyFactory {
    fn create(&self) -> Result<IndexProxy> {
        Ok(IndexProxy::online(self.descriptor.clone(), self.accessor.clone()))
    }
}

/// Builds the FAILED delegate from a cause
pub trait FailedIndexProxyFactory: Send + Sync {
    fn create(&self, cause: FailureCause) -> IndexProxy;
}

/// Plain FAILED proxy for one descriptor
#[derive(Debug, Clone)]
pub struct DefaultFailedIndexProxyFactory {
    descriptor: IndexDescriptor,
}

impl DefaultFailedIndexProxyFactory {
    pub fn new(descriptor: IndexDescriptor) -> Self {
        Self { descriptor }
    }
}

impl FailedIndexProxyFactory for DefaultFailedIndexProxyFactory {
    fn create(&self, cause: FailureCause) -> IndexProxy {
        IndexProxy::failed(self.descriptor.clone(), cause)
    }
}

/// 可翻转的索引代理：POPULATING → ONLINE / FAILED
pub struct FlippableIndexProxy {
    delegate: RwLock<Arc<IndexProxy>>,
    flip_target: Mutex<Option<Arc<dyn IndexProxyFactory>>>,
}

impl FlippableIndexProxy {
    pub fn new(initial: IndexProxy) -> Self {
        Self {
            delegate: RwLock::new(Arc::new(initial)),
            flip_target: Mutex::new(None),
        }
    }

    /// Set what a successful flip turns this proxy into
    pub fn set_flip_target(&self, target: Arc<dyn IndexProxyFactory>) {
        *self.flip_target.lock() = Some(target);
    }

    pub fn state(&self) -> InternalIndexState {
        self.delegate.read().state()
    }

    pub fn descriptor(&self) -> IndexDescriptor {
        self.delegate.read().descriptor().clone()
    }

    /// Snapshot of the current delegate
    pub fn delegate(&self) -> Arc<IndexProxy> {
        self.delegate.read().clone()
    }

    pub fn failure(&self) -> Option<FailureCause> {
        self.delegate.read().failure().cloned()
    }

    /// Forward one update to the current delegate
    pub fn update(&self, update: IndexEntryUpdate) -> Result<()> {
        self.delegate.read().update(update)
    }

    /// Forward one update, reporting whether the delegate took it
    pub fn offer(&self, update: IndexEntryUpdate) -> Result<bool> {
        self.delegate.read().accept(update)
    }

    /// Run `action` under exclusive access, then swap in the flip target.
    ///
    /// - `Ok(true)` from the action → flipped to the target
    /// - `Ok(false)` → delegate left untouched
    /// - `Err(cause)` → flipped to `failed_factory.create(cause)`
    ///
    /// Only a POPULATING proxy can flip. Returns whether it went online.
    pub fn flip<F>(
        &self,
        action: F,
        failed_factory: &dyn FailedIndexProxyFactory,
    ) -> std::result::Result<bool, FailureCause>
    where
        F: FnOnce() -> std::result::Result<bool, FailureCause>,
    {
        let mut delegate = self.delegate.write();
        if !matches!(**delegate, IndexProxy::Populating(_)) {
            return Err(PopulationError::IllegalState(format!(
                "cannot flip index {} in state {}",
                delegate.descriptor().name,
                delegate.state()
            ))
            .into_cause());
        }

        let target = self.flip_target.lock().clone();
        let target = match target {
            Some(target) => target,
            None => {
                let cause = PopulationError::IllegalState(format!(
                    "no flip target set for index {}",
                    delegate.descriptor().name
                ))
                .into_cause();
                *delegate = Arc::new(failed_factory.create(cause.clone()));
                return Err(cause);
            }
        };

        let outcome = action().and_then(|flip| {
            if !flip {
                return Ok(None);
            }
            target.create().map(Some).map_err(PopulationError::into_cause)
        });
        match outcome {
            Ok(Some(online)) => {
                *delegate = Arc::new(online);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(cause) => {
                *delegate = Arc::new(failed_factory.create(cause.clone()));
                Err(cause)
            }
        }
    }

    /// Flip to FAILED unless already terminal; returns whether it flipped.
    pub fn flip_to_failed(
        &self,
        failed_factory: &dyn FailedIndexProxyFactory,
        cause: FailureCause,
    ) -> bool {
        let mut delegate = self.delegate.write();
        if !matches!(**delegate, IndexProxy::Populating(_)) {
            return false;
        }
        *delegate = Arc::new(failed_factory.create(cause));
        true
    }

    /// Release a constraint-backing index for reads
    pub fn activate(&self) -> Result<()> {
        let delegate = self.delegate.read();
        match &**delegate {
            IndexProxy::Online(online) => {
                online.awaiting_activation.store(false, Ordering::Release);
                Ok(())
            }
            other => Err(PopulationError::IllegalState(format!(
                "cannot activate index {} in state {}",
                other.descriptor().name,
                other.state()
            ))),
        }
    }
}

impl fmt::Debug for FlippableIndexProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlippableIndexProxy")
            .field("delegate", &*self.delegate.read())
            .finish()
    }
}
