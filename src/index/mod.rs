//! Index layer
//!
//! Physical index contracts, the in-memory reference index and the
//! flippable proxies the database sees while an index is being built.

pub mod memory;
pub mod populator;
pub mod proxy;

pub use memory::{InMemoryIndex, InMemoryIndexPopulator, InMemoryIndexProvider, SharedIndex};
pub use populator::{IndexAccessor, IndexPopulator, IndexProvider, IndexSample, IndexUpdater};
pub use proxy::{
    DefaultFailedIndexProxyFactory, FailedIndexProxyFactory, FlippableIndexProxy, IndexProxy,
    IndexProxyFactory, InternalIndexState, OnlineIndexProxyFactory,
};
