//! Cost-bounded in-memory cache.
//!
//! - [`entry`]: CacheKey and CacheEntry definitions
//! - [`store`]: The count- and cost-bounded store
//! - [`evictor`]: LRU eviction policy
//! - [`weigher`]: Cost functions for cached values

pub mod entry;
pub mod evictor;
pub mod store;
pub mod weigher;

pub use entry::{CacheEntry, CacheKey, KeyError};
pub use store::{CacheStats, CostCache};
pub use weigher::{ByteLenWeigher, UnitWeigher, Weigher};
