//! Exchange adapter trait definitions.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{ExchangeHealth, OrderBookTop, QuotePoint, Symbol, TradingPair};

/// Trait for upstream exchanges.
///
/// Implement this trait to add a new price source. The coordinator calls
/// adapters concurrently and guards each one with the circuit breaker; the
/// adapter itself owns rate limiting, retries and symbol mapping.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use coinfeed_market_data::exchange::ExchangeAdapter;
///
/// struct MyExchange {
///     client: ExchangeClient,
/// }
///
/// #[async_trait]
/// impl ExchangeAdapter for MyExchange {
///     fn id(&self) -> &str {
///         "my_exchange"
///     }
///
///     // ... implement fetch and symbol methods
/// }
/// ```
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Stable source identifier ("binance", "luno").
    ///
    /// Used for logging, circuit breaker tracking and cache keys.
    fn id(&self) -> &str;

    /// Ordering hint when results from several exchanges are merged.
    ///
    /// Lower values = higher priority. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    /// Fetch the latest quotes for canonical symbols.
    ///
    /// Returns the supported subset. Symbols the exchange doesn't list are
    /// dropped; only a failure of the whole call is an error.
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<QuotePoint>, MarketDataError>;

    /// Map a canonical symbol ("BTC") to the exchange's pair name.
    fn normalize_symbol(&self, canonical: &str) -> String;

    /// Map an exchange pair name back to the canonical symbol.
    fn denormalize_symbol(&self, native: &str) -> String;

    /// Cheap liveness probe plus the adapter's rolling health figures.
    async fn health_check(&self) -> Result<ExchangeHealth, MarketDataError>;

    /// Active pairs quoted in the adapter's quote currency.
    async fn fetch_trading_pairs(&self) -> Result<Vec<TradingPair>, MarketDataError>;

    /// Best bid and ask for one canonical symbol.
    async fn fetch_order_book_top(&self, symbol: &str) -> Result<OrderBookTop, MarketDataError>;
}
