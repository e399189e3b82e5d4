//! Online Index Population Engine
//!
//! 在线构建二级索引：一次存储扫描 + 并发写入持续进行
//!
//! ## 核心特性
//! - 一次扫描同时构建多个索引（同一实体类型）
//! - 扫描期间的并发更新通过无锁队列汇入，翻转前全部应用
//! - 单个索引失败不影响其他索引
//! - 取消与失败是两种不同的终态
//!
//! ## 架构
//! - 扫描层: `scan` (StoreScan / IndexStoreView)
//! - 索引层: `index` (IndexPopulator contract + FlippableIndexProxy)
//! - 构建层: `population` (ConcurrentUpdateQueue + MultipleIndexPopulator + IndexPopulationJob)
//! - 协作者: `schema_state`, `stats`, `logging`

pub mod config;
pub mod index;
pub mod logging;
pub mod population;
pub mod scan;
pub mod schema_state;
pub mod stats;
pub mod types;

mod error;

pub use config::{IndexSamplingConfig, PopulationConfig};
pub use error::{FailureCause, PopulationError, Result};

// 主要对外 API
pub use index::{FlippableIndexProxy, IndexPopulator, IndexProvider, InternalIndexState};
pub use logging::{PopulationLog, TracingLog};
pub use population::{
    spawn_population, IndexPopulationJob, JobState, MultipleIndexPopulator, PopulationContext,
};
pub use scan::{IndexStoreView, StoreScan};
pub use types::{EntityType, IndexDescriptor, IndexEntryUpdate, SchemaDescriptor, Value};
