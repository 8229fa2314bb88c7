//! Coinfeed Market Data Crate
//!
//! This crate aggregates live crypto market data from several exchanges
//! behind one read API.
//!
//! # Overview
//!
//! The market data crate supports:
//! - One adapter per exchange (Binance, Luno) behind a fixed interface
//! - Rate limiting, retry with backoff and circuit breaking per exchange
//! - A hot / warm / cold cache with write-through and cold-store fallback
//! - Quality tiers assigned by staleness, magnitude and cross-exchange checks
//! - Reference-counted push subscriptions
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   Aggregator     |  get_market_data / history / health / subscriptions
//! +------------------+
//!          |  hot -> warm lookup
//!          v
//! +------------------+     +------------------+
//! |   TieredCache    | --> |   ColdStore      |  (fallback + history)
//! +------------------+     +------------------+
//!          |  miss
//!          v
//! +------------------+
//! | CircuitBreaker   |  (skip open exchanges)
//! +------------------+
//!          |  concurrent fan-out, per-call timeout
//!          v
//! +------------------+
//! | ExchangeAdapter  |  (Binance, Luno; rate limited, retried)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |   Validator      |  (quality tier per point)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`MarketDataAggregator`] - The engine; owns all shared state
//! - [`QuotePoint`] - One exchange's observation of one symbol
//! - [`AggregatedQuote`] - Caller-facing result with cache and timing metadata
//! - [`QualityTier`] - HIGH / MEDIUM / LOW / SUSPECT
//! - [`ExchangeAdapter`] - The per-exchange interface
//! - [`MarketDataError`] - Error type carrying an [`ErrorCode`]

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod models;
pub mod registry;

pub use aggregator::{AggregatorBuilder, HealthObserver, LoggingHealthObserver, MarketDataAggregator};

pub use cache::{ColdStore, MemoryColdStore, MemoryWarmStore, WarmStore};
#[cfg(feature = "redis")]
pub use cache::RedisWarmStore;

pub use config::{AggregatorConfig, ExchangeConfig, ExchangeKind};

pub use errors::{ErrorCode, MarketDataError, RetryClass};

pub use exchange::{BinanceAdapter, ExchangeAdapter, LunoAdapter};

// Re-export all public types from models
pub use models::{
    AggregatedQuote, CacheTier, DataOrigin, ExchangeHealth, HealthStatus, HistoricalOptions,
    HistoricalPoint, HistoryQuery, OrderBookTop, QualityTier, QueryOptions, QuotePoint, SortField,
    SortOrder, Subscription, SubscriptionRequest, Symbol, TimeInterval, TradingPair, UpdateChannel,
    UpdateEvent,
};

pub use registry::{CircuitBreaker, CircuitState, DataQualityValidator, RateLimiter};
