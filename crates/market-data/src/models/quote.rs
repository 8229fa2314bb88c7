use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Symbol;

/// Data quality tier assigned to every [`QuotePoint`].
///
/// Variants are declared worst-first so the derived ordering gives
/// `High > Medium > Low > Suspect`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Suspect,
    Low,
    Medium,
    High,
}

impl QualityTier {
    /// Returns the worse of the two tiers.
    pub fn downgrade(self, other: QualityTier) -> QualityTier {
        self.min(other)
    }

    /// HIGH and MEDIUM points may be written to the hot and warm tiers.
    pub fn is_fresh_cacheable(self) -> bool {
        self >= QualityTier::Medium
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
            Self::Suspect => write!(f, "SUSPECT"),
        }
    }
}

/// How a point reached us.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transport {
    Rest,
    Websocket,
    /// Read back from the cold store.
    Store,
}

/// Where a point came from and how reliable that path is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Upstream endpoint path (e.g. `/api/v3/ticker/24hr`)
    pub endpoint: String,
    pub transport: Transport,
    /// Source reliability in `[0, 1]`
    pub reliability: f64,
    /// Round-trip latency of the call that produced the point
    pub latency_ms: u64,
}

/// One exchange's observation of one symbol at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotePoint {
    /// Canonical symbol (e.g. "BTC")
    pub symbol: Symbol,

    /// Source exchange id (e.g. "binance")
    pub exchange: String,

    /// Last traded price in USD
    pub price_usd: Decimal,

    pub price_change_24h: Decimal,

    pub price_change_percent_24h: Decimal,

    pub volume_24h: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_change_24h: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,

    /// Best bid, when the source reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,

    /// Best ask, when the source reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,

    /// `(ask - bid) / ask * 100`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_percent: Option<Decimal>,

    /// When the exchange observed the price
    pub observed_at: DateTime<Utc>,

    pub provenance: Provenance,

    pub quality: QualityTier,
}

impl QuotePoint {
    /// Returns a copy carrying a different quality tier.
    pub fn with_quality(&self, quality: QualityTier) -> Self {
        Self {
            quality,
            ..self.clone()
        }
    }

    /// Age of the observation relative to `now`. Future timestamps count as zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        let age = now - self.observed_at;
        if age < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            age
        }
    }
}

/// Computes `(ask - bid) / ask * 100`, or `None` when the ask is not positive.
pub fn spread_percent(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    if ask <= Decimal::ZERO {
        return None;
    }
    Some(((ask - bid) / ask * Decimal::ONE_HUNDRED).round_dp(6))
}

/// An active market listed by an exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Canonical base symbol (e.g. "BTC")
    pub symbol: Symbol,
    /// Exchange-native pair name (e.g. "BTCUSDT", "XBTZAR")
    pub native_symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub exchange: String,
}

/// Best bid/ask for one pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub symbol: Symbol,
    pub exchange: String,
    /// Currency the bid and ask are quoted in
    pub quote_asset: String,
    pub bid: Decimal,
    pub bid_quantity: Decimal,
    pub ask: Decimal,
    pub ask_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_percent: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) fn sample_point(symbol: &str, exchange: &str, price: Decimal) -> QuotePoint {
    QuotePoint {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        price_usd: price,
        price_change_24h: Decimal::ZERO,
        price_change_percent_24h: Decimal::ZERO,
        volume_24h: Decimal::ONE_THOUSAND,
        volume_change_24h: None,
        high_24h: Some(price),
        low_24h: Some(price),
        market_cap: None,
        bid: None,
        ask: None,
        spread_percent: None,
        observed_at: Utc::now(),
        provenance: Provenance {
            endpoint: "/test".to_string(),
            transport: Transport::Rest,
            reliability: 0.9,
            latency_ms: 5,
        },
        quality: QualityTier::High,
    }
}
