//! Population scheduling
//!
//! Each job gets its own named worker thread. The handle registered with
//! the job records cancellation requests and lets the owner join the
//! worker.

use crate::population::job::{IndexPopulationJob, JobHandle};
use crate::{PopulationError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handle of a population running on its own thread
#[derive(Debug, Default)]
pub struct ThreadJobHandle {
    cancel_requested: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadJobHandle {
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Wait for the worker; a second call returns immediately
    pub fn join(&self) -> Result<()> {
        let thread = self.thread.lock().take();
        match thread {
            Some(thread) => thread.join().map_err(|_| {
                PopulationError::IllegalState("index population thread panicked".to_string())
            }),
            None => Ok(()),
        }
    }
}

impl JobHandle for ThreadJobHandle {
    fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }
}

/// Run `job` on a new thread named `index-population-<name>`
pub fn spawn_population(job: Arc<IndexPopulationJob>, name: &str) -> Result<Arc<ThreadJobHandle>> {
    let handle = Arc::new(ThreadJobHandle::default());
    job.set_handle(handle.clone());

    let worker = job.clone();
    let thread = thread::Builder::new()
        .name(format!("index-population-{}", name))
        .spawn(move || worker.run())?;
    *handle.thread.lock() = Some(thread);
    tracing::debug!(name, "index population scheduled");
    Ok(handle)
}
