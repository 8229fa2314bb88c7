//! Redis-backed warm tier (feature `redis`).

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::warm::WarmStore;
use crate::errors::MarketDataError;

fn storage_error(err: redis::RedisError) -> MarketDataError {
    MarketDataError::Storage(format!("redis: {}", err))
}

/// Warm store shared through Redis. Expiry is delegated to Redis (`SET EX`).
#[derive(Clone)]
pub struct RedisWarmStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisWarmStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1/`). Keys are namespaced by `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, MarketDataError> {
        let client = redis::Client::open(url).map_err(storage_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(storage_error)?;
        info!("Connected warm store to redis");
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl WarmStore for RedisWarmStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MarketDataError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(self.key(key))
            .await
            .map_err(storage_error)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), MarketDataError> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, secs)
            .await
            .map_err(storage_error)
    }

    async fn remove(&self, key: &str) -> Result<(), MarketDataError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(storage_error)
    }

    async fn purge_expired(&self) -> Result<usize, MarketDataError> {
        Ok(0)
    }
}
