//! Connection caching for service factories

pub mod caching_pool;
pub mod disposal;
pub mod pooled;
pub mod queue;
pub mod reaper;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use caching_pool::{CachingPool, PoolStats};
pub use disposal::Disposal;
pub use pooled::Pooled;
pub use queue::{CacheQueue, TtlEntry};
