//! Warm tier: a shared key-value store with per-entry expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;

use crate::errors::MarketDataError;

/// Key-value store shared between engine instances.
///
/// Values are JSON documents. `set` must store the value and its expiry
/// atomically.
#[async_trait]
pub trait WarmStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MarketDataError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), MarketDataError>;

    async fn remove(&self, key: &str) -> Result<(), MarketDataError>;

    /// Drops expired entries. Returns how many were removed; stores that
    /// expire entries on their own return 0.
    async fn purge_expired(&self) -> Result<usize, MarketDataError>;
}

/// Process-local warm store.
#[derive(Default)]
pub struct MemoryWarmStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl WarmStore for MemoryWarmStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MarketDataError> {
        let now = Instant::now();
        let value = self.entries.get(key).and_then(|entry| {
            let (value, expires_at) = entry.value();
            (*expires_at > now).then(|| value.clone())
        });
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), MarketDataError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), MarketDataError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, MarketDataError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Warm store purged {} expired entries", removed);
        }
        Ok(removed)
    }
}
