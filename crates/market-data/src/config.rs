//! Engine configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a JSON file only
//! needs the values it wants to override.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;
use crate::registry::CircuitBreakerConfig;

/// Supported exchange implementations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Binance,
    Luno,
}

/// Exponential backoff policy for transient upstream failures.
///
/// The whole retry sequence runs inside the exchange's per-call timeout, so
/// the summed delays must leave room for the attempts themselves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 250,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `initial_delay * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Sum of every backoff delay when all retries are used.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries).map(|attempt| self.delay_for(attempt)).sum()
    }
}

/// Per-exchange circuit breaker thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
        }
    }
}

/// One upstream exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Source id used in cache keys, logs and the circuit registry
    pub id: String,
    pub kind: ExchangeKind,
    /// Overrides the adapter's default API root
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Lower runs first when results are ordered by source
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Reliability score stamped on every point from this source
    #[serde(default = "default_reliability")]
    pub reliability: f64,
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_enabled() -> bool {
    true
}

fn default_reliability() -> f64 {
    0.9
}

impl ExchangeConfig {
    pub fn new(id: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: None,
            requests_per_minute: default_requests_per_minute(),
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            priority: 0,
            enabled: true,
            reliability: default_reliability(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Minimum spacing between two requests to this exchange.
    pub fn min_request_interval(&self) -> Duration {
        if self.requests_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(60_000 / self.requests_per_minute as u64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    pub hot_ttl_secs: u64,
    pub warm_ttl_secs: u64,
    /// Retention hint for the cold tier
    pub cold_ttl_secs: u64,
    pub max_hot_items: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            hot_ttl_secs: 10,
            warm_ttl_secs: 30,
            cold_ttl_secs: 3_600,
            max_hot_items: 100,
        }
    }
}

/// How the cross-exchange reference price is derived from peers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePrice {
    #[default]
    Median,
    Mean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum plausible |24h change| in percent
    pub max_price_deviation: Decimal,
    pub max_data_age_secs: u64,
    pub cross_exchange_validation: bool,
    pub cross_exchange_tolerance_percent: Decimal,
    pub reference_price: ReferencePrice,
    /// Peers required before cross-source disagreement downgrades a point
    pub min_peers: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_price_deviation: Decimal::from(20),
            max_data_age_secs: 60,
            cross_exchange_validation: true,
            cross_exchange_tolerance_percent: Decimal::from(5),
            reference_price: ReferencePrice::Median,
            min_peers: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Soft latency budget; exceeding it logs a warning
    pub max_response_time_ms: u64,
    pub max_symbols_per_request: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_response_time_ms: 500,
            max_symbols_per_request: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub health_check_interval_secs: u64,
    pub health_check_timeout_ms: u64,
    pub cache_cleanup_interval_secs: u64,
    /// Consecutive failures after which an exchange reports UNHEALTHY
    pub unhealthy_failure_threshold: u32,
    /// Poll period of subscription streams
    pub stream_poll_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            health_check_timeout_ms: 5_000,
            cache_cleanup_interval_secs: 60,
            unhealthy_failure_threshold: 3,
            stream_poll_interval_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub historical_ttl_secs: u64,
    pub max_history_window_days: i64,
    pub max_history_rows: usize,
    /// Cold records younger than this may be served on total upstream failure
    pub fallback_window_secs: i64,
    pub fallback_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            historical_ttl_secs: 300,
            max_history_window_days: 30,
            max_history_rows: 1_000,
            fallback_window_secs: 300,
            fallback_limit: 100,
        }
    }
}

/// Top-level configuration of the aggregation engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub exchanges: Vec<ExchangeConfig>,
    pub caching: CachingConfig,
    pub validation: ValidationConfig,
    pub performance: PerformanceConfig,
    pub monitoring: MonitoringConfig,
    pub history: HistoryConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let mut binance = ExchangeConfig::new("binance", ExchangeKind::Binance);
        binance.requests_per_minute = 1_200;
        binance.reliability = 0.95;

        let mut luno = ExchangeConfig::new("luno", ExchangeKind::Luno);
        luno.requests_per_minute = 300;
        luno.priority = 1;

        Self {
            exchanges: vec![binance, luno],
            caching: CachingConfig::default(),
            validation: ValidationConfig::default(),
            performance: PerformanceConfig::default(),
            monitoring: MonitoringConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl AggregatorConfig {
    /// Parses a JSON document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, MarketDataError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        let mut seen = std::collections::HashSet::new();
        for exchange in &self.exchanges {
            if exchange.id.trim().is_empty() {
                return Err(MarketDataError::InvalidRequest(
                    "exchange id must not be empty".to_string(),
                ));
            }
            if !seen.insert(exchange.id.as_str()) {
                return Err(MarketDataError::InvalidRequest(format!(
                    "duplicate exchange id '{}'",
                    exchange.id
                )));
            }
            if exchange.circuit_breaker.failure_threshold == 0 {
                return Err(MarketDataError::InvalidRequest(format!(
                    "exchange '{}': failure_threshold must be at least 1",
                    exchange.id
                )));
            }
            if exchange.retry.total_backoff() >= exchange.timeout() {
                log::warn!(
                    "exchange '{}': retry backoff {:?} does not fit in the {:?} call timeout; late retries will time out",
                    exchange.id,
                    exchange.retry.total_backoff(),
                    exchange.timeout()
                );
            }
            if !(0.0..=1.0).contains(&exchange.reliability) {
                return Err(MarketDataError::InvalidRequest(format!(
                    "exchange '{}': reliability must be within [0, 1]",
                    exchange.id
                )));
            }
        }
        if self.caching.max_hot_items == 0 {
            return Err(MarketDataError::InvalidRequest(
                "caching.max_hot_items must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
