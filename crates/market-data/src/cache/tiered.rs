//! Hot -> warm -> cold cache facade used by the coordinator.
//!
//! Reads consult hot then warm (backfilling hot on a warm hit). Writes go
//! through every tier below the one written. Warm and cold failures are
//! logged and treated as misses; they never fail a request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cold::ColdStore;
use super::hot::HotCache;
use super::warm::WarmStore;
use crate::config::CachingConfig;
use crate::models::{CacheTier, QuotePoint};

/// Counters exposed through `cache_stats()`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hot_entries: u64,
    pub hot_hits: u64,
    pub hot_misses: u64,
    pub warm_hits: u64,
    pub warm_misses: u64,
    pub warm_errors: u64,
    pub cold_writes: u64,
    pub cold_errors: u64,
}

pub struct TieredCache {
    hot: HotCache,
    warm: Arc<dyn WarmStore>,
    cold: Arc<dyn ColdStore>,
    warm_ttl: Duration,
    warm_hits: AtomicU64,
    warm_misses: AtomicU64,
    warm_errors: AtomicU64,
    cold_writes: AtomicU64,
    cold_errors: AtomicU64,
}

impl TieredCache {
    pub fn new(config: &CachingConfig, warm: Arc<dyn WarmStore>, cold: Arc<dyn ColdStore>) -> Self {
        Self {
            hot: HotCache::new(
                Duration::from_secs(config.hot_ttl_secs),
                config.max_hot_items,
            ),
            warm,
            cold,
            warm_ttl: Duration::from_secs(config.warm_ttl_secs),
            warm_hits: AtomicU64::new(0),
            warm_misses: AtomicU64::new(0),
            warm_errors: AtomicU64::new(0),
            cold_writes: AtomicU64::new(0),
            cold_errors: AtomicU64::new(0),
        }
    }

    pub fn cold(&self) -> &Arc<dyn ColdStore> {
        &self.cold
    }

    pub fn hot_ttl(&self) -> Duration {
        self.hot.ttl()
    }

    pub fn warm_ttl(&self) -> Duration {
        self.warm_ttl
    }

    /// Look `key` up in hot, then warm.
    pub async fn lookup(&self, key: &str) -> Option<(Arc<Vec<QuotePoint>>, CacheTier)> {
        if let Some(points) = self.hot.get(key) {
            return Some((points, CacheTier::Hot));
        }

        let points: Vec<QuotePoint> = self.warm_get(key).await?;
        let points = Arc::new(points);
        self.hot.insert(key.to_string(), points.clone());
        Some((points, CacheTier::Warm))
    }

    /// Write a fresh result to hot and warm. Cold persistence is separate,
    /// see [`persist`](Self::persist).
    pub async fn store_fresh(&self, key: &str, points: Arc<Vec<QuotePoint>>) {
        self.hot.insert(key.to_string(), points.clone());
        self.warm_set(key, points.as_ref(), self.warm_ttl).await;
    }

    /// Append validated points to the cold tier.
    pub async fn persist(&self, points: &[QuotePoint]) {
        if points.is_empty() {
            return;
        }
        match self.cold.persist(points).await {
            Ok(written) => {
                self.cold_writes.fetch_add(written as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.cold_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cold store write failed: {}", e);
            }
        }
    }

    /// Typed read from the warm tier; decoding failures count as misses.
    pub async fn warm_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.warm.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    self.warm_hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Warm cache hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    self.warm_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Discarding undecodable warm entry '{}': {}", key, e);
                    None
                }
            },
            Ok(None) => {
                self.warm_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.warm_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Warm store read failed for '{}': {}", key, e);
                None
            }
        }
    }

    /// Typed write to the warm tier.
    pub async fn warm_set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode warm entry '{}': {}", key, e);
                return;
            }
        };
        if let Err(e) = self.warm.set(key, json, ttl).await {
            self.warm_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Warm store write failed for '{}': {}", key, e);
        }
    }

    /// Drop expired hot and warm entries.
    pub async fn sweep(&self) {
        self.hot.sweep();
        match self.warm.purge_expired().await {
            Ok(removed) if removed > 0 => debug!("Cache sweep removed {} warm entries", removed),
            Ok(_) => {}
            Err(e) => warn!("Warm store sweep failed: {}", e),
        }
    }

    pub fn clear_hot(&self) {
        self.hot.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hot_entries: self.hot.entry_count(),
            hot_hits: self.hot.hits(),
            hot_misses: self.hot.misses(),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            warm_misses: self.warm_misses.load(Ordering::Relaxed),
            warm_errors: self.warm_errors.load(Ordering::Relaxed),
            cold_writes: self.cold_writes.load(Ordering::Relaxed),
            cold_errors: self.cold_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryColdStore, MemoryWarmStore};
    use crate::errors::MarketDataError;
    use crate::models::sample_point;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct BrokenWarmStore;

    #[async_trait]
    impl WarmStore for BrokenWarmStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, MarketDataError> {
            Err(MarketDataError::Storage("down".to_string()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), MarketDataError> {
            Err(MarketDataError::Storage("down".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<(), MarketDataError> {
            Err(MarketDataError::Storage("down".to_string()))
        }
        async fn purge_expired(&self) -> Result<usize, MarketDataError> {
            Err(MarketDataError::Storage("down".to_string()))
        }
    }

    fn points() -> Arc<Vec<QuotePoint>> {
        Arc::new(vec![sample_point("BTC", "binance", dec!(45000))])
    }

    #[tokio::test]
    async fn test_fresh_write_hits_hot_first() {
        let cache = TieredCache::new(
            &CachingConfig::default(),
            Arc::new(MemoryWarmStore::new()),
            Arc::new(MemoryColdStore::new()),
        );
        cache.store_fresh("k", points()).await;

        let (found, tier) = cache.lookup("k").await.unwrap();
        assert_eq!(tier, CacheTier::Hot);
        assert_eq!(found.as_ref(), points().as_ref());
    }

    #[tokio::test]
    async fn test_warm_hit_backfills_hot() {
        let warm = Arc::new(MemoryWarmStore::new());
        let cache = TieredCache::new(
            &CachingConfig::default(),
            warm.clone(),
            Arc::new(MemoryColdStore::new()),
        );
        cache.store_fresh("k", points()).await;
        cache.clear_hot();

        let (_, tier) = cache.lookup("k").await.unwrap();
        assert_eq!(tier, CacheTier::Warm);

        let (_, tier) = cache.lookup("k").await.unwrap();
        assert_eq!(tier, CacheTier::Hot);
        assert_eq!(cache.stats().warm_hits, 1);
    }

    #[tokio::test]
    async fn test_warm_failure_is_a_miss() {
        let cache = TieredCache::new(
            &CachingConfig::default(),
            Arc::new(BrokenWarmStore),
            Arc::new(MemoryColdStore::new()),
        );
        cache.store_fresh("k", points()).await;
        cache.clear_hot();

        assert!(cache.lookup("k").await.is_none());
        assert!(cache.stats().warm_errors >= 2);
        cache.sweep().await;
    }

    #[tokio::test]
    async fn test_persist_counts_cold_writes() {
        let cold = Arc::new(MemoryColdStore::new());
        let cache = TieredCache::new(
            &CachingConfig::default(),
            Arc::new(MemoryWarmStore::new()),
            cold.clone(),
        );
        cache.persist(points().as_ref()).await;
        cache.persist(&[]).await;

        assert_eq!(cold.len(), 1);
        assert_eq!(cache.stats().cold_writes, 1);
    }
}
