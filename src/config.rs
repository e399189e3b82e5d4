//! Population configuration
//!
//! Knobs for batching, queue reconciliation, sampling and phase logging.
//! Built in code by whoever wires the engine; nothing here reads files.

use crate::{PopulationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 采样配置（Index Sampling）
///
/// Handed to the physical index provider when a populator is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSamplingConfig {
    /// Maximum number of entries a populator feeds into its sample.
    ///
    /// Entries past the limit still get indexed, they just don't count
    /// towards the selectivity estimate.
    pub sample_size_limit: usize,
}

impl Default for IndexSamplingConfig {
    fn default() -> Self {
        Self {
            sample_size_limit: 8_388_608, // 8M entries
        }
    }
}

/// 索引构建配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Scan entries buffered per populator before `add` is called.
    pub batch_size: usize,

    /// Pending concurrent updates that trigger an early, mid-scan
    /// application of the updates whose entities were already visited.
    ///
    /// Updates for entities the scan has not reached stay queued.
    pub queue_threshold: usize,

    /// Verify deferred uniqueness constraints inside the flip.
    pub verify_before_flipping: bool,

    /// Period of the `TIME/PHASE Total` progress records.
    ///
    /// - None = only the final record is logged
    /// - Some(10s) = default
    pub phase_log_period: Option<Duration>,

    /// Sampling knobs passed to the index provider.
    pub sampling: IndexSamplingConfig,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            queue_threshold: 10_000,
            verify_before_flipping: false,
            phase_log_period: Some(Duration::from_secs(10)),
            sampling: IndexSamplingConfig::default(),
        }
    }
}

impl PopulationConfig {
    /// 测试用配置：小批量，关闭周期日志
    pub fn for_testing() -> Self {
        Self {
            batch_size: 2,
            queue_threshold: 4,
            phase_log_period: None,
            ..Default::default()
        }
    }

    /// 大数据量场景：更大的批次和队列阈值
    pub fn for_large_stores() -> Self {
        Self {
            batch_size: 10_000,
            queue_threshold: 100_000,
            ..Default::default()
        }
    }

    /// Builder-style toggle for deferred constraint verification.
    pub fn with_verify_before_flipping(mut self, verify: bool) -> Self {
        self.verify_before_flipping = verify;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PopulationError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.queue_threshold == 0 {
            return Err(PopulationError::InvalidArgument(
                "queue_threshold must be at least 1".to_string(),
            ));
        }
        if matches!(self.phase_log_period, Some(period) if period.is_zero()) {
            return Err(PopulationError::InvalidArgument(
                "phase_log_period must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
