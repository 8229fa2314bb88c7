//! Daemon settings read from `COINFEED_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "./data/coinfeed.db";
const DEFAULT_SYMBOLS: &str = "BTC,ETH,SOL,ADA,XRP";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_RETENTION_DAYS: i64 = 35;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file for the cold store
    pub db_path: String,
    /// Optional JSON file with an `AggregatorConfig`; defaults are used when unset
    pub engine_config_path: Option<PathBuf>,
    /// Warm tier in Redis instead of process memory (needs the `redis` feature)
    pub redis_url: Option<String>,
    /// Symbols the poll loop keeps warm
    pub symbols: Vec<String>,
    pub poll_interval: Duration,
    /// Cold records older than this are pruned once a day
    pub retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let symbols_raw = non_empty("COINFEED_SYMBOLS").unwrap_or_else(|| DEFAULT_SYMBOLS.to_string());
        let mut symbols: Vec<String> = Vec::new();
        for symbol in symbols_raw.split(',').map(|s| s.trim().to_uppercase()) {
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }

        let poll_secs = non_empty("COINFEED_POLL_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let retention_days = non_empty("COINFEED_RETENTION_DAYS")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        Self {
            db_path: non_empty("COINFEED_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            engine_config_path: non_empty("COINFEED_CONFIG").map(PathBuf::from),
            redis_url: non_empty("COINFEED_REDIS_URL"),
            symbols,
            poll_interval: Duration::from_secs(poll_secs),
            retention_days,
        }
    }
}
