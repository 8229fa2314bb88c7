//! Luno exchange adapter.
//!
//! Luno quotes most assets against ZAR:
//! - `/api/1/tickers` for every ticker in one call
//! - `/api/1/ticker?pair=` as the health probe
//! - `/api/1/orderbook_top` for best bid/ask
//!
//! ZAR prices are converted to USD through the USDC/ZAR ticker. Luno reports
//! neither 24h change nor 24h range, so its points carry a zero change and no
//! high/low, which caps them at MEDIUM.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

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

pub const BASE_URL: &str = "https://api.luno.com";
pub const EXCHANGE_ID: &str = "luno";

const TICKERS_ENDPOINT: &str = "/api/1/tickers";
const TICKER_ENDPOINT: &str = "/api/1/ticker";
const ORDERBOOK_TOP_ENDPOINT: &str = "/api/1/orderbook_top";

const QUOTE_CURRENCY: &str = "ZAR";

/// Pair whose last trade gives ZAR per USD.
const USD_REFERENCE_PAIR: &str = "USDCZAR";

const HEALTH_PROBE_PAIR: &str = "XBTZAR";

/// Canonical symbols whose Luno pair differs from `{SYMBOL}ZAR`.
const PAIR_OVERRIDES: &[(&str, &str)] = &[("BTC", "XBTZAR")];

/// Luno's own ticker for an asset, where it differs from the canonical one.
const ASSET_ALIASES: &[(&str, &str)] = &[("XBT", "BTC")];

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    tickers: Vec<Ticker>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ticker {
    pair: String,
    /// ms since epoch
    timestamp: i64,
    bid: Decimal,
    ask: Decimal,
    last_trade: Decimal,
    /// Base-asset volume over the last 24h
    rolling_24_hour_volume: Decimal,
    status: String,
}

#[derive(Debug, Deserialize)]
struct OrderBookTopResponse {
    timestamp: i64,
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: Decimal,
    volume: Decimal,
}

// ============================================================================
// Adapter
// ============================================================================

/// Luno adapter.
pub struct LunoAdapter {
    id: String,
    priority: u8,
    client: ExchangeClient,
}

impl LunoAdapter {
    pub fn new(
        config: &ExchangeConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, MarketDataError> {
        let client = ExchangeClient::new(config, BASE_URL, rate_limiter)?;
        info!(exchange = %config.id, "Luno adapter initialized");
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
}

#[async_trait]
impl ExchangeAdapter for LunoAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<QuotePoint>, MarketDataError> {
        let wanted: Vec<(Symbol, String)> = symbols
            .iter()
            .map(|s| (canonical_symbol(s), self.normalize_symbol(s)))
            .filter(|(_, pair)| pair.ends_with(QUOTE_CURRENCY))
            .collect();
        if wanted.is_empty() {
            debug!(exchange = %self.id, ?symbols, "No supported Luno pairs for symbols");
            return Ok(Vec::new());
        }

        let timed = self
            .client
            .get_json::<TickersResponse>(TICKERS_ENDPOINT, &[])
            .await?;
        let provenance = self.client.provenance(TICKERS_ENDPOINT, timed.latency_ms);

        let points = tickers_to_points(timed.value.tickers, &wanted, &self.id, &provenance)?;
        debug!(
            exchange = %self.id,
            requested = symbols.len(),
            returned = points.len(),
            latency_ms = timed.latency_ms,
            "Luno quotes fetched"
        );
        Ok(points)
    }

    fn normalize_symbol(&self, canonical: &str) -> String {
        let symbol = canonical_symbol(canonical);
        if let Some((_, pair)) = PAIR_OVERRIDES.iter().find(|(s, _)| *s == symbol) {
            return pair.to_string();
        }
        if (2..=5).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            format!("{}{}", symbol, QUOTE_CURRENCY)
        } else {
            symbol
        }
    }

    fn denormalize_symbol(&self, native: &str) -> String {
        let native = native.to_ascii_uppercase();
        if let Some((symbol, _)) = PAIR_OVERRIDES.iter().find(|(_, p)| *p == native) {
            return symbol.to_string();
        }
        match split_pair(&native) {
            Some((base, _)) => base,
            None => native,
        }
    }

    async fn health_check(&self) -> Result<ExchangeHealth, MarketDataError> {
        let endpoint = format!("{}?pair={}", TICKER_ENDPOINT, HEALTH_PROBE_PAIR);
        if let Err(e) = self.client.probe(&endpoint).await {
            warn!(exchange = %self.id, "Luno health probe failed: {}", e);
        }
        Ok(self.client.health())
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<TradingPair>, MarketDataError> {
        let timed = self
            .client
            .get_json::<TickersResponse>(TICKERS_ENDPOINT, &[])
            .await?;
        let pairs = tickers_to_pairs(timed.value.tickers, &self.id);
        info!(exchange = %self.id, count = pairs.len(), "Luno trading pairs fetched");
        Ok(pairs)
    }

    async fn fetch_order_book_top(&self, symbol: &str) -> Result<OrderBookTop, MarketDataError> {
        let pair = self.normalize_symbol(symbol);
        let timed = self
            .client
            .get_json::<OrderBookTopResponse>(ORDERBOOK_TOP_ENDPOINT, &[("pair", pair.as_str())])
            .await?;
        book_to_top(timed.value, canonical_symbol(symbol), &pair, &self.id)
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn canonical_asset(asset: &str) -> String {
    ASSET_ALIASES
        .iter()
        .find(|(alias, _)| *alias == asset)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| asset.to_string())
}

/// Splits a Luno pair name into canonical base and quote assets.
fn split_pair(pair: &str) -> Option<(String, String)> {
    if pair.len() < 6 || !pair.is_ascii() {
        return None;
    }
    let (base, quote) = pair.split_at(pair.len() - 3);
    Some((canonical_asset(base), quote.to_string()))
}

fn tickers_to_points(
    tickers: Vec<Ticker>,
    wanted: &[(Symbol, String)],
    exchange: &str,
    provenance: &Provenance,
) -> Result<Vec<QuotePoint>, MarketDataError> {
    let by_pair: HashMap<&str, &Ticker> = tickers.iter().map(|t| (t.pair.as_str(), t)).collect();

    let zar_per_usd = by_pair
        .get(USD_REFERENCE_PAIR)
        .map(|t| t.last_trade)
        .filter(|rate| *rate > Decimal::ZERO)
        .ok_or_else(|| MarketDataError::ExchangeUnavailable {
            exchange: exchange.to_string(),
            message: format!("Missing {} reference ticker", USD_REFERENCE_PAIR),
            maintenance: false,
        })?;

    let mut points = Vec::with_capacity(wanted.len());
    for (symbol, pair) in wanted {
        let Some(ticker) = by_pair.get(pair.as_str()) else {
            debug!(exchange, pair = %pair, "Trading pair not found on Luno");
            continue;
        };
        if ticker.status != "ACTIVE" {
            debug!(exchange, pair = %pair, status = %ticker.status, "Skipping inactive Luno pair");
            continue;
        }

        let price_usd = (ticker.last_trade / zar_per_usd).round_dp(8);
        let bid = (ticker.bid / zar_per_usd).round_dp(8);
        let ask = (ticker.ask / zar_per_usd).round_dp(8);

        let point = QuotePoint {
            symbol: symbol.clone(),
            exchange: exchange.to_string(),
            price_usd,
            price_change_24h: Decimal::ZERO,
            price_change_percent_24h: Decimal::ZERO,
            volume_24h: (ticker.rolling_24_hour_volume * price_usd).round_dp(2),
            volume_change_24h: None,
            high_24h: None,
            low_24h: None,
            market_cap: None,
            bid: Some(bid),
            ask: Some(ask),
            spread_percent: spread_percent(ticker.bid, ticker.ask),
            observed_at: millis_to_datetime(ticker.timestamp),
            provenance: provenance.clone(),
            quality: QualityTier::Medium,
        };
        points.push(quality::score(point));
    }
    Ok(points)
}

fn tickers_to_pairs(tickers: Vec<Ticker>, exchange: &str) -> Vec<TradingPair> {
    tickers
        .into_iter()
        .filter(|t| t.status == "ACTIVE")
        .filter_map(|t| {
            let (base, quote) = split_pair(&t.pair)?;
            (quote == QUOTE_CURRENCY).then(|| TradingPair {
                symbol: base.clone(),
                native_symbol: t.pair,
                base_asset: base,
                quote_asset: quote,
                exchange: exchange.to_string(),
            })
        })
        .collect()
}

fn book_to_top(
    book: OrderBookTopResponse,
    symbol: Symbol,
    pair: &str,
    exchange: &str,
) -> Result<OrderBookTop, MarketDataError> {
    let (Some(bid), Some(ask)) = (book.bids.first(), book.asks.first()) else {
        return Err(MarketDataError::ExchangeUnavailable {
            exchange: exchange.to_string(),
            message: format!("Empty order book for {}", pair),
            maintenance: false,
        });
    };
    let quote_asset = split_pair(pair)
        .map(|(_, quote)| quote)
        .unwrap_or_else(|| QUOTE_CURRENCY.to_string());

    Ok(OrderBookTop {
        symbol,
        exchange: exchange.to_string(),
        quote_asset,
        bid: bid.price,
        bid_quantity: bid.volume,
        ask: ask.price,
        ask_quantity: ask.volume,
        spread_percent: spread_percent(bid.price, ask.price),
        observed_at: millis_to_datetime(book.timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeKind;
    use crate::models::Transport;
    use rust_decimal_macros::dec;

    fn adapter() -> LunoAdapter {
        let config = ExchangeConfig::new("luno", ExchangeKind::Luno);
        LunoAdapter::new(&config, Arc::new(RateLimiter::new())).unwrap()
    }

    fn provenance() -> Provenance {
        Provenance {
            endpoint: TICKERS_ENDPOINT.to_string(),
            transport: Transport::Rest,
            reliability: 0.9,
            latency_ms: 80,
        }
    }

    fn tickers_json(timestamp: i64) -> String {
        format!(
            r#"{{
            "tickers": [
                {{"pair": "XBTZAR", "timestamp": {ts}, "bid": "899000.00", "ask": "900000.00",
                  "last_trade": "900000.00", "rolling_24_hour_volume": "12.5", "status": "ACTIVE"}},
                {{"pair": "ETHZAR", "timestamp": {ts}, "bid": "54000.00", "ask": "54100.00",
                  "last_trade": "54000.00", "rolling_24_hour_volume": "100", "status": "POSTONLY"}},
                {{"pair": "USDCZAR", "timestamp": {ts}, "bid": "17.99", "ask": "18.01",
                  "last_trade": "18.00", "rolling_24_hour_volume": "50000", "status": "ACTIVE"}},
                {{"pair": "XBTNGN", "timestamp": {ts}, "bid": "1", "ask": "2",
                  "last_trade": "2", "rolling_24_hour_volume": "1", "status": "ACTIVE"}}
            ]
        }}"#,
            ts = timestamp
        )
    }

    #[test]
    fn test_symbol_mapping() {
        let luno = adapter();
        assert_eq!(luno.normalize_symbol("BTC"), "XBTZAR");
        assert_eq!(luno.normalize_symbol("eth"), "ETHZAR");
        assert_eq!(luno.normalize_symbol("VERYLONGTOKEN"), "VERYLONGTOKEN");

        assert_eq!(luno.denormalize_symbol("XBTZAR"), "BTC");
        assert_eq!(luno.denormalize_symbol("LTCZAR"), "LTC");
        assert_eq!(luno.denormalize_symbol("XBTNGN"), "BTC");
        assert_eq!(luno.denormalize_symbol("ABC"), "ABC");
    }

    #[test]
    fn test_tickers_converted_to_usd() {
        let response: TickersResponse =
            serde_json::from_str(&tickers_json(Utc::now().timestamp_millis())).unwrap();
        let wanted = vec![
            ("BTC".to_string(), "XBTZAR".to_string()),
            ("ETH".to_string(), "ETHZAR".to_string()),
            ("DOGE".to_string(), "DOGEZAR".to_string()),
        ];

        let points = tickers_to_points(response.tickers, &wanted, "luno", &provenance()).unwrap();

        // ETH is not ACTIVE and DOGE is not listed
        assert_eq!(points.len(), 1);
        let btc = &points[0];
        assert_eq!(btc.symbol, "BTC");
        assert_eq!(btc.price_usd, dec!(50000));
        assert_eq!(btc.volume_24h, dec!(625000));
        assert_eq!(btc.price_change_percent_24h, Decimal::ZERO);
        assert!(btc.high_24h.is_none());
        assert_eq!(btc.quality, QualityTier::Medium);
    }

    #[test]
    fn test_missing_usd_reference_fails_whole_call() {
        let response = TickersResponse {
            tickers: Vec::new(),
        };
        let wanted = vec![("BTC".to_string(), "XBTZAR".to_string())];
        let err = tickers_to_points(response.tickers, &wanted, "luno", &provenance()).unwrap_err();
        assert!(matches!(err, MarketDataError::ExchangeUnavailable { .. }));
    }

    #[test]
    fn test_trading_pairs_only_active_zar() {
        let response: TickersResponse = serde_json::from_str(&tickers_json(0)).unwrap();
        let pairs = tickers_to_pairs(response.tickers, "luno");

        let names: Vec<_> = pairs.iter().map(|p| p.native_symbol.as_str()).collect();
        assert_eq!(names, vec!["XBTZAR", "USDCZAR"]);
        assert_eq!(pairs[0].base_asset, "BTC");
    }

    #[test]
    fn test_orderbook_top() {
        let json = r#"{
            "timestamp": 1700000000000,
            "bids": [{"price": "990.00", "volume": "0.5"}],
            "asks": [{"price": "1000.00", "volume": "0.25"}]
        }"#;
        let book: OrderBookTopResponse = serde_json::from_str(json).unwrap();
        let top = book_to_top(book, "ETH".to_string(), "ETHZAR", "luno").unwrap();

        assert_eq!(top.quote_asset, "ZAR");
        assert_eq!(top.spread_percent, Some(dec!(1)));
        assert_eq!(top.bid_quantity, dec!(0.5));
    }
}
