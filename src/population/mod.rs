//! Online index population
//!
//! - `queue`: concurrent updates from committing transactions
//! - `multiple`: one scan feeding many indexes, per-index failure isolation
//! - `job`: the lifecycle driver (scan → reconcile → flip)
//! - `phase`: SCAN / WRITE / APPLY_EXTERNAL / FLIP timings
//! - `scheduler`: worker threads and job handles

pub mod job;
pub mod multiple;
pub mod phase;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use job::{IndexPopulationJob, JobHandle, JobState, NoMonitor, PopulationMonitor};
pub use multiple::{MultipleIndexPopulator, MultipleIndexUpdater, PopulationContext};
pub use phase::{Phase, PhaseTracker};
pub use queue::{ConcurrentUpdateQueue, QueuedUpdate, UpdateSink};
pub use scheduler::{spawn_population, ThreadJobHandle};
