//! Binance exchange adapter.
//!
//! Quotes come from the public spot REST API:
//! - `/api/v3/ticker/24hr` for rolling 24h tickers
//! - `/api/v3/exchangeInfo` for the pair listing
//! - `/api/v3/depth` for the top of the order book
//! - `/api/v3/ping` as the health probe
//!
//! Canonical symbols map onto USDT pairs (BTC -> BTCUSDT). USDT is treated
//! as USD.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ExchangeConfig;
use crate::errors::MarketDataError;
use crate::exchange::client::ExchangeClient;
use crate::exchange::quality;
use crate::exchange::ExchangeAdapter;
use crate::models::{
    canonical_symbol, spread_percent, ExchangeHealth, OrderBookTop, Provenance, QualityTier,
    QuotePoint, Symbol, TradingPair,
};
use crate::registry::RateLimiter;

pub const BASE_URL: &str = "https://api.binance.com";
pub const EXCHANGE_ID: &str = "binance";

const TICKER_ENDPOINT: &str = "/api/v3/ticker/24hr";
const EXCHANGE_INFO_ENDPOINT: &str = "/api/v3/exchangeInfo";
const DEPTH_ENDPOINT: &str = "/api/v3/depth";
const PING_ENDPOINT: &str = "/api/v3/ping";

/// Quote asset canonical symbols are paired with.
const QUOTE_ASSET: &str = "USDT";

/// Quote assets stripped when mapping pair names back.
const KNOWN_QUOTE_ASSETS: &[&str] = &["USDT", "BUSD", "USDC", "FDUSD"];

// ============================================================================
// API Response Structures
// ============================================================================

/// Response item from /api/v3/ticker/24hr
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    price_change: Decimal,
    price_change_percent: Decimal,
    last_price: Decimal,
    #[serde(default)]
    bid_price: Option<Decimal>,
    #[serde(default)]
    ask_price: Option<Decimal>,
    high_price: Decimal,
    low_price: Decimal,
    /// 24h volume in the quote asset (USDT)
    quote_volume: Decimal,
    /// Close of the rolling window, ms since epoch
    close_time: i64,
}

/// Response from /api/v3/exchangeInfo
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

/// Response from /api/v3/depth
#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Binance spot market adapter.
pub struct BinanceAdapter {
    id: String,
    priority: u8,
    client: ExchangeClient,
}

impl BinanceAdapter {
    pub fn new(
        config: &ExchangeConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, MarketDataError> {
        let client = ExchangeClient::new(config, BASE_URL, rate_limiter)?;
        info!(exchange = %config.id, "Binance adapter initialized");
        Ok(Self {
            id: config.id.clone(),
            priority: config.priority,
            client,
        })
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.client = self.client.with_unhealthy_threshold(threshold);
        self
    }

    async fn fetch_tickers(&self, pairs: &[String]) -> Result<(Vec<Ticker24h>, u64, String), MarketDataError> {
        if let [pair] = pairs {
            let endpoint = format!("{}?symbol={}", TICKER_ENDPOINT, pair);
            match self
                .client
                .get_json::<Ticker24h>(TICKER_ENDPOINT, &[("symbol", pair.as_str())])
                .await
            {
                Ok(timed) => Ok((vec![timed.value], timed.latency_ms, endpoint)),
                Err(MarketDataError::InvalidSymbol(msg)) => {
                    debug!(exchange = %self.id, pair, "Pair not listed: {}", msg);
                    Ok((Vec::new(), 0, endpoint))
                }
                Err(e) => Err(e),
            }
        } else {
            let wanted: HashSet<&str> = pairs.iter().map(String::as_str).collect();
            let timed = self
                .client
                .get_json::<Vec<Ticker24h>>(TICKER_ENDPOINT, &[])
                .await?;
            let tickers = timed
                .value
                .into_iter()
                .filter(|t| wanted.contains(t.symbol.as_str()))
                .collect();
            Ok((tickers, timed.latency_ms, TICKER_ENDPOINT.to_string()))
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<QuotePoint>, MarketDataError> {
        let mut pairs: Vec<String> = symbols.iter().map(|s| self.normalize_symbol(s)).collect();
        pairs.sort();
        pairs.dedup();
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let (tickers, latency_ms, endpoint) = self.fetch_tickers(&pairs).await?;
        let provenance = self.client.provenance(&endpoint, latency_ms);

        let points: Vec<QuotePoint> = tickers
            .into_iter()
            .map(|t| {
                let symbol = self.denormalize_symbol(&t.symbol);
                quality::score(ticker_to_point(t, symbol, &self.id, provenance.clone()))
            })
            .collect();

        debug!(
            exchange = %self.id,
            requested = symbols.len(),
            returned = points.len(),
            latency_ms,
            "Binance quotes fetched"
        );
        Ok(points)
    }

    fn normalize_symbol(&self, canonical: &str) -> String {
        let symbol = canonical_symbol(canonical);
        let already_paired = KNOWN_QUOTE_ASSETS
            .iter()
            .any(|q| symbol.len() > q.len() && symbol.ends_with(q));
        if already_paired {
            symbol
        } else {
            format!("{}{}", symbol, QUOTE_ASSET)
        }
    }

    fn denormalize_symbol(&self, native: &str) -> String {
        let native = native.to_ascii_uppercase();
        for quote in KNOWN_QUOTE_ASSETS {
            if let Some(base) = native.strip_suffix(quote) {
                if !base.is_empty() {
                    return base.to_string();
                }
            }
        }
        native
    }

    async fn health_check(&self) -> Result<ExchangeHealth, MarketDataError> {
        if let Err(e) = self.client.probe(PING_ENDPOINT).await {
            debug!(exchange = %self.id, "Binance ping failed: {}", e);
        }
        Ok(self.client.health())
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<TradingPair>, MarketDataError> {
        let timed = self
            .client
            .get_json::<ExchangeInfo>(EXCHANGE_INFO_ENDPOINT, &[])
            .await?;
        let pairs = listing_to_pairs(timed.value, &self.id);
        info!(exchange = %self.id, count = pairs.len(), "Binance trading pairs fetched");
        Ok(pairs)
    }

    async fn fetch_order_book_top(&self, symbol: &str) -> Result<OrderBookTop, MarketDataError> {
        let pair = self.normalize_symbol(symbol);
        let timed = self
            .client
            .get_json::<Depth>(DEPTH_ENDPOINT, &[("symbol", pair.as_str()), ("limit", "5")])
            .await?;
        depth_to_top(timed.value, canonical_symbol(symbol), &self.id, Utc::now())
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn ticker_to_point(
    ticker: Ticker24h,
    symbol: Symbol,
    exchange: &str,
    provenance: Provenance,
) -> QuotePoint {
    let spread = match (ticker.bid_price, ticker.ask_price) {
        (Some(bid), Some(ask)) => spread_percent(bid, ask),
        _ => None,
    };

    QuotePoint {
        symbol,
        exchange: exchange.to_string(),
        price_usd: ticker.last_price,
        price_change_24h: ticker.price_change,
        price_change_percent_24h: ticker.price_change_percent,
        volume_24h: ticker.quote_volume,
        volume_change_24h: None,
        high_24h: Some(ticker.high_price),
        low_24h: Some(ticker.low_price),
        market_cap: None,
        bid: ticker.bid_price,
        ask: ticker.ask_price,
        spread_percent: spread,
        observed_at: millis_to_datetime(ticker.close_time),
        provenance,
        quality: QualityTier::High,
    }
}

fn listing_to_pairs(info: ExchangeInfo, exchange: &str) -> Vec<TradingPair> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset == QUOTE_ASSET)
        .map(|s| TradingPair {
            symbol: s.base_asset.clone(),
            native_symbol: s.symbol,
            base_asset: s.base_asset,
            quote_asset: s.quote_asset,
            exchange: exchange.to_string(),
        })
        .collect()
}

fn depth_to_top(
    depth: Depth,
    symbol: Symbol,
    exchange: &str,
    observed_at: DateTime<Utc>,
) -> Result<OrderBookTop, MarketDataError> {
    let (Some(&(bid, bid_quantity)), Some(&(ask, ask_quantity))) =
        (depth.bids.first(), depth.asks.first())
    else {
        return Err(MarketDataError::ExchangeUnavailable {
            exchange: exchange.to_string(),
            message: format!("Empty order book for {}", symbol),
            maintenance: false,
        });
    };

    Ok(OrderBookTop {
        symbol,
        exchange: exchange.to_string(),
        quote_asset: QUOTE_ASSET.to_string(),
        bid,
        bid_quantity,
        ask,
        ask_quantity,
        spread_percent: spread_percent(bid, ask),
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeKind;
    use crate::models::Transport;
    use rust_decimal_macros::dec;

    fn adapter() -> BinanceAdapter {
        let config = ExchangeConfig::new("binance", ExchangeKind::Binance);
        BinanceAdapter::new(&config, Arc::new(RateLimiter::new())).unwrap()
    }

    fn provenance() -> Provenance {
        Provenance {
            endpoint: TICKER_ENDPOINT.to_string(),
            transport: Transport::Rest,
            reliability: 0.95,
            latency_ms: 42,
        }
    }

    const TICKER_JSON: &str = r#"{
        "symbol": "BTCUSDT",
        "priceChange": "1000.00000000",
        "priceChangePercent": "2.270",
        "weightedAvgPrice": "44500.1",
        "prevClosePrice": "44000.00",
        "lastPrice": "45000.00000000",
        "lastQty": "0.01",
        "bidPrice": "44999.00000000",
        "askPrice": "45000.00000000",
        "openPrice": "44000.00",
        "highPrice": "45500.00000000",
        "lowPrice": "43800.00000000",
        "volume": "20000.5",
        "quoteVolume": "900000000.25",
        "openTime": 1700000000000,
        "closeTime": 1700086400000,
        "firstId": 1,
        "lastId": 2,
        "count": 2
    }"#;

    #[test]
    fn test_normalize_symbol() {
        let binance = adapter();
        assert_eq!(binance.normalize_symbol("BTC"), "BTCUSDT");
        assert_eq!(binance.normalize_symbol("eth"), "ETHUSDT");
        assert_eq!(binance.normalize_symbol("SOLUSDT"), "SOLUSDT");
        // A bare quote asset still gets paired
        assert_eq!(binance.normalize_symbol("USDC"), "USDCUSDT");
    }

    #[test]
    fn test_denormalize_only_strips_quote_suffix() {
        let binance = adapter();
        assert_eq!(binance.denormalize_symbol("BTCUSDT"), "BTC");
        assert_eq!(binance.denormalize_symbol("WBTCUSDT"), "WBTC");
        assert_eq!(binance.denormalize_symbol("ETHBUSD"), "ETH");
        assert_eq!(binance.denormalize_symbol("ETHBTC"), "ETHBTC");
    }

    #[test]
    fn test_parse_ticker() {
        let ticker: Ticker24h = serde_json::from_str(TICKER_JSON).unwrap();
        let point = ticker_to_point(ticker, "BTC".to_string(), "binance", provenance());

        assert_eq!(point.symbol, "BTC");
        assert_eq!(point.price_usd, dec!(45000));
        assert_eq!(point.price_change_percent_24h, dec!(2.27));
        assert_eq!(point.volume_24h, dec!(900000000.25));
        assert_eq!(point.high_24h, Some(dec!(45500)));
        assert_eq!(point.observed_at.timestamp_millis(), 1700086400000);
        assert_eq!(point.provenance.latency_ms, 42);
        assert!(point.spread_percent.unwrap() > Decimal::ZERO);
    }

    #[test]
    fn test_parse_ticker_list() {
        let json = format!("[{}]", TICKER_JSON);
        let tickers: Vec<Ticker24h> = serde_json::from_str(&json).unwrap();
        assert_eq!(tickers.len(), 1);
    }

    #[test]
    fn test_listing_filters_to_trading_usdt_pairs() {
        let json = r#"{
            "timezone": "UTC",
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "ETHBTC", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "BTC"},
                {"symbol": "LUNAUSDT", "status": "BREAK", "baseAsset": "LUNA", "quoteAsset": "USDT"}
            ]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let pairs = listing_to_pairs(info, "binance");

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol, "BTC");
        assert_eq!(pairs[0].native_symbol, "BTCUSDT");
    }

    #[test]
    fn test_depth_to_top() {
        let json = r#"{
            "lastUpdateId": 1,
            "bids": [["99.00", "2.5"], ["98.00", "1"]],
            "asks": [["100.00", "1.5"]]
        }"#;
        let depth: Depth = serde_json::from_str(json).unwrap();
        let top = depth_to_top(depth, "SOL".to_string(), "binance", Utc::now()).unwrap();

        assert_eq!(top.bid, dec!(99));
        assert_eq!(top.ask_quantity, dec!(1.5));
        assert_eq!(top.spread_percent, Some(dec!(1)));
    }

    #[test]
    fn test_empty_depth_is_an_error() {
        let depth = Depth {
            bids: Vec::new(),
            asks: Vec::new(),
        };
        assert!(depth_to_top(depth, "SOL".to_string(), "binance", Utc::now()).is_err());
    }
}
