//! Tiered cache.
//!
//! - `hot` - In-process moka cache of fresh results
//! - `warm` - Shared key-value tier ([`WarmStore`]), in-memory or Redis
//! - `cold` - Durable history ([`ColdStore`])
//! - `tiered` - The read/write-through facade over all three
//! - `key` - Deterministic cache keys

mod cold;
mod hot;
pub mod key;
#[cfg(feature = "redis")]
mod redis_store;
mod tiered;
mod warm;

pub use cold::{ColdStore, MemoryColdStore};
pub use hot::HotCache;
#[cfg(feature = "redis")]
pub use redis_store::RedisWarmStore;
pub use tiered::{CacheStats, TieredCache};
pub use warm::{MemoryWarmStore, WarmStore};
