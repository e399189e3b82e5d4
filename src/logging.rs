//! Population log sink
//!
//! Index state transitions are reported as one record per index, carrying
//! the human-readable schema label. The sink is a trait so callers can route
//! records wherever they keep their database log; `TracingLog` sends them to
//! `tracing`.

use crate::error::FailureCause;

/// Target used for all population records
pub const LOG_TARGET: &str = "indexpop::population";

/// Structured sink for population records
pub trait PopulationLog: Send + Sync {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    /// An error record together with the failure that caused it
    fn error(&self, message: &str, cause: &FailureCause);
}

/// Forwards records to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl PopulationLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!(target: LOG_TARGET, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: LOG_TARGET, "{}", message);
    }

    fn error(&self, message: &str, cause: &FailureCause) {
        tracing::error!(target: LOG_TARGET, error = %cause, "{}", message);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl PopulationLog for NullLog {
    fn info(&self, _message: &str) {}

    fn warn(&self, _message: &str) {}

    fn error(&self, _message: &str, _cause: &FailureCause) {}
}
