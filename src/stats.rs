//! Index statistics store
//!
//! Holds the selectivity sample each index ends its population with. The
//! file-backed store persists all entries as one bincode blob framed as
//! `[data_len: u32][data][crc32: u32]`.

use crate::index::IndexSample;
use crate::types::IndexId;
use crate::{PopulationError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored statistics of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub index_size: u64,
    pub unique_values: u64,
    pub sample_size: u64,

    /// Unix seconds of the last replace
    pub updated_at: u64,
}

impl IndexStatistics {
    fn from_sample(sample: &IndexSample) -> Self {
        let updated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            index_size: sample.index_size,
            unique_values: sample.unique_values,
            sample_size: sample.sample_size,
            updated_at,
        }
    }

    /// unique values / sample size, 1.0 for an empty sample
    pub fn selectivity(&self) -> f64 {
        if self.sample_size == 0 {
            return 1.0;
        }
        self.unique_values as f64 / self.sample_size as f64
    }
}

pub trait IndexStatisticsStore: Send + Sync {
    /// Replace whatever is stored for `index_id`
    fn replace_stats(&self, index_id: IndexId, sample: &IndexSample) -> Result<()>;

    fn stats(&self, index_id: IndexId) -> Option<IndexStatistics>;
}

/// Statistics kept in memory only
#[derive(Debug, Default)]
pub struct InMemoryIndexStatisticsStore {
    stats: DashMap<IndexId, IndexStatistics>,
}

impl InMemoryIndexStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStatisticsStore for InMemoryIndexStatisticsStore {
    fn replace_stats(&self, index_id: IndexId, sample: &IndexSample) -> Result<()> {
        self.stats.insert(index_id, IndexStatistics::from_sample(sample));
        Ok(())
    }

    fn stats(&self, index_id: IndexId) -> Option<IndexStatistics> {
        self.stats.get(&index_id).map(|entry| entry.value().clone())
    }
}

/// Statistics persisted to `index_statistics.bin`
pub struct FileIndexStatisticsStore {
    stats: Arc<DashMap<IndexId, IndexStatistics>>,
    path: PathBuf,
}

impl FileIndexStatisticsStore {
    /// Open under `dir`, loading whatever was saved before
    pub fn open(dir: &Path) -> Result<Self> {
        let store = Self {
            stats: Arc::new(DashMap::new()),
            path: dir.join("index_statistics.bin"),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let encoded = std::fs::read(&self.path)?;
        let data = decode_with_checksum(&encoded)?;
        let entries: Vec<(IndexId, IndexStatistics)> = bincode::deserialize(data)?;
        for (id, stats) in entries {
            self.stats.insert(id, stats);
        }
        Ok(())
    }

    /// Write every entry to disk
    pub fn save(&self) -> Result<()> {
        let mut entries: Vec<(IndexId, IndexStatistics)> = self
            .stats
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let data = bincode::serialize(&entries)?;
        std::fs::write(&self.path, encode_with_checksum(&data))?;
        Ok(())
    }

    /// Forget `index_id` (e.g. the index was dropped)
    pub fn remove(&self, index_id: IndexId) -> Result<()> {
        self.stats.remove(&index_id);
        self.save()
    }
}

impl IndexStatisticsStore for FileIndexStatisticsStore {
    fn replace_stats(&self, index_id: IndexId, sample: &IndexSample) -> Result<()> {
        self.stats.insert(index_id, IndexStatistics::from_sample(sample));
        self.save()
    }

    fn stats(&self, index_id: IndexId) -> Option<IndexStatistics> {
        self.stats.get(&index_id).map(|entry| entry.value().clone())
    }
}

/// 格式: [data_len: u32][data: [u8]][checksum: u32]
fn encode_with_checksum(data: &[u8]) -> Vec<u8> {
    let checksum = crc32fast::hash(data);
    let mut encoded = Vec::with_capacity(4 + data.len() + 4);
    encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
    encoded.extend_from_slice(data);
    encoded.extend_from_slice(&checksum.to_le_bytes());
    encoded
}

fn decode_with_checksum(encoded: &[u8]) -> Result<&[u8]> {
    if encoded.len() < 8 {
        return Err(PopulationError::Corruption("statistics file too short".to_string()));
    }
    let data_len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
    if encoded.len() != 4 + data_len + 4 {
        return Err(PopulationError::Corruption(format!(
            "expected {} bytes, got {}",
            4 + data_len + 4,
            encoded.len()
        )));
    }

    let data = &encoded[4..4 + data_len];
    let tail = &encoded[4 + data_len..];
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let actual = crc32fast::hash(data);
    if actual != expected {
        return Err(PopulationError::Corruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    Ok(data)
}
