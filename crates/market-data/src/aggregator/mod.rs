//! Aggregation coordinator and its background machinery.
//!
//! - `coordinator` - [`MarketDataAggregator`], the caller-facing engine
//! - `history` - Window resolution and OHLC bucketing for historical reads
//! - `subscriptions` - Reference-counted subscription streams
//! - `monitor` - Health monitor, cache sweeper and stream pollers

mod coordinator;
pub mod history;
mod monitor;
mod subscriptions;

pub use coordinator::{AggregatorBuilder, MarketDataAggregator};
pub use monitor::{HealthObserver, LoggingHealthObserver};
pub use subscriptions::{StreamKey, SubscriptionRegistry};
