//! Market data models
//!
//! This module contains the core data types for aggregation:
//! - `types` - Type aliases for common identifiers (Symbol, SubscriptionId)
//! - `quote` - Per-exchange observations (QuotePoint, QualityTier, Provenance)
//! - `response` - Aggregated responses and their metadata
//! - `history` - Historical candles and time intervals
//! - `options` - Caller query options
//! - `health` - Exchange health reports
//! - `subscription` - Push subscriptions and update events

mod health;
mod history;
mod options;
mod quote;
mod response;
mod subscription;
mod types;

pub use health::{ExchangeHealth, HealthStatus};
pub use history::{HistoricalPoint, HistoryQuery, TimeInterval};
pub use options::{HistoricalOptions, QueryOptions, SortField, SortOrder};
pub use quote::{
    spread_percent, OrderBookTop, Provenance, QualityTier, QuotePoint, TradingPair, Transport,
};
pub use response::{
    AggregatedQuote, CacheInfo, CacheTier, DataOrigin, PerformanceInfo, ResponseMetadata,
};
pub use subscription::{Subscription, SubscriptionRequest, UpdateChannel, UpdateEvent};
pub use types::{canonical_symbol, SubscriptionId, Symbol};

#[cfg(test)]
pub(crate) use quote::sample_point;
