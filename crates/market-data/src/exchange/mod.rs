//! Exchange adapters.
//!
//! This module contains:
//! - `traits` - The [`ExchangeAdapter`] trait every upstream implements
//! - `client` - Shared rate-limited, retrying HTTP client
//! - `quality` - Provisional quality scoring
//! - `binance` / `luno` - Concrete adapters

pub mod binance;
pub mod client;
pub mod luno;
pub mod quality;
mod traits;

use std::sync::Arc;

pub use binance::BinanceAdapter;
pub use client::ExchangeClient;
pub use luno::LunoAdapter;
pub use traits::ExchangeAdapter;

use crate::config::{ExchangeConfig, ExchangeKind};
use crate::errors::MarketDataError;
use crate::registry::RateLimiter;

/// Builds the adapter for an exchange configuration.
pub fn build_adapter(
    config: &ExchangeConfig,
    rate_limiter: Arc<RateLimiter>,
    unhealthy_threshold: u32,
) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
    let adapter: Arc<dyn ExchangeAdapter> = match config.kind {
        ExchangeKind::Binance => Arc::new(
            BinanceAdapter::new(config, rate_limiter)?.with_unhealthy_threshold(unhealthy_threshold),
        ),
        ExchangeKind::Luno => Arc::new(
            LunoAdapter::new(config, rate_limiter)?.with_unhealthy_threshold(unhealthy_threshold),
        ),
    };
    Ok(adapter)
}
