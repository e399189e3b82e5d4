//! Error types for the index population engine

use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PopulationError>;

/// A failure shared between the log, the FAILED proxy and the populator.
///
/// Every party that reports a failed index holds the same instance.
pub type FailureCause = Arc<PopulationError>;

#[derive(Error, Debug)]
pub enum PopulationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage initialization failed: {0}")]
    StorageInitialization(String),

    #[error("Store scan failed: {0}")]
    Scan(String),

    #[error("Populator failed: {0}")]
    Populator(String),

    #[error("Index population already registered for schema {0}")]
    DuplicatePopulation(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // 唯一性约束校验失败
    #[error("Index entry conflict: {0}")]
    EntryConflict(String),

    #[error("Statistics error: {0}")]
    Statistics(String),

    #[error("Data corruption: {0}")]
    Corruption(String),
}

impl From<bincode::Error> for PopulationError {
    fn from(err: bincode::Error) -> Self {
        PopulationError::Serialization(err.to_string())
    }
}

impl PopulationError {
    /// Wrap into a shareable failure cause.
    pub fn into_cause(self) -> FailureCause {
        Arc::new(self)
    }
}
