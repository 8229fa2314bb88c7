//! In-process hot tier backed by moka.
//!
//! Eviction uses moka's LRU policy rather than plain insertion order (moka
//! has no FIFO policy). Entries nobody reads again leave oldest first; a
//! result that is still being served survives an older unread one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::models::QuotePoint;

/// Bounded, TTL-expiring cache of fresh results keyed by request.
pub struct HotCache {
    cache: Cache<String, Arc<Vec<QuotePoint>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HotCache {
    pub fn new(ttl: Duration, max_items: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<QuotePoint>>> {
        match self.cache.get(key) {
            Some(points) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Hot cache hit: {}", key);
                Some(points)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, points: Arc<Vec<QuotePoint>>) {
        self.cache.insert(key, points);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Applies pending expirations and evictions.
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_point;
    use rust_decimal_macros::dec;

    fn points() -> Arc<Vec<QuotePoint>> {
        Arc::new(vec![sample_point("BTC", "binance", dec!(45000))])
    }

    #[test]
    fn test_insert_and_get() {
        let cache = HotCache::new(Duration::from_secs(10), 100);
        cache.insert("k".to_string(), points());

        assert!(cache.get("k").is_some());
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_entries_expire() {
        let cache = HotCache::new(Duration::from_millis(20), 100);
        cache.insert("k".to_string(), points());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = HotCache::new(Duration::from_secs(10), 2);
        for i in 0..10 {
            cache.insert(format!("k{}", i), points());
        }
        cache.sweep();
        assert!(cache.entry_count() <= 2);
    }

    #[test]
    fn test_unread_entries_leave_oldest_first() {
        let cache = HotCache::new(Duration::from_secs(10), 2);
        for key in ["k0", "k1", "k2"] {
            cache.insert(key.to_string(), points());
            cache.sweep();
        }

        assert!(!cache.cache.contains_key("k0"));
        assert!(cache.cache.contains_key("k1"));
        assert!(cache.cache.contains_key("k2"));
    }

    #[test]
    fn test_reread_entry_outlives_older_unread_one() {
        let cache = HotCache::new(Duration::from_secs(10), 2);
        cache.insert("k0".to_string(), points());
        cache.sweep();
        cache.insert("k1".to_string(), points());
        cache.sweep();

        assert!(cache.get("k0").is_some());
        cache.sweep();
        cache.insert("k2".to_string(), points());
        cache.sweep();

        assert!(cache.cache.contains_key("k0"));
        assert!(!cache.cache.contains_key("k1"));
    }

    #[test]
    fn test_clear() {
        let cache = HotCache::new(Duration::from_secs(10), 10);
        cache.insert("k".to_string(), points());
        cache.clear();
        assert!(cache.get("k").is_none());
    }
}
