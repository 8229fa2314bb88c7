use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quote::QuotePoint;

/// Where the points of an [`AggregatedQuote`] were served from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataOrigin {
    /// Hot, in-process tier
    Memory,
    /// Shared warm tier
    Warm,
    /// Fresh fan-out to the exchanges
    Live,
    /// Recent cold-store records served after every exchange failed
    Fallback,
}

/// Cache tier that answered a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub total: usize,
    pub origin: DataOrigin,
    pub server_time: DateTime<Utc>,
    /// Age of the oldest point, in milliseconds
    pub data_age_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub hit: bool,
    pub ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<CacheTier>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceInfo {
    pub elapsed_ms: u64,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub store_queries: u32,
}

/// Result of a `get_market_data` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedQuote {
    pub data: Vec<QuotePoint>,
    pub metadata: ResponseMetadata,
    pub cache: CacheInfo,
    pub performance: PerformanceInfo,
}

impl AggregatedQuote {
    pub fn new(
        data: Vec<QuotePoint>,
        origin: DataOrigin,
        cache: CacheInfo,
        performance: PerformanceInfo,
    ) -> Self {
        let server_time = Utc::now();
        let data_age_ms = data
            .iter()
            .map(|p| p.age(server_time).num_milliseconds())
            .max()
            .unwrap_or(0);

        Self {
            metadata: ResponseMetadata {
                total: data.len(),
                origin,
                server_time,
                data_age_ms,
            },
            data,
            cache,
            performance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quote::sample_point;
    use rust_decimal_macros::dec;

    #[test]
    fn test_data_age_is_oldest_point() {
        let fresh = sample_point("BTC", "binance", dec!(45000));
        let mut old = sample_point("ETH", "binance", dec!(3000));
        old.observed_at = Utc::now() - chrono::Duration::seconds(120);

        let response = AggregatedQuote::new(
            vec![fresh, old],
            DataOrigin::Live,
            CacheInfo {
                hit: false,
                ttl_secs: 10,
                tier: None,
            },
            PerformanceInfo::default(),
        );

        assert_eq!(response.metadata.total, 2);
        assert!(response.metadata.data_age_ms >= 120_000);
    }

    #[test]
    fn test_empty_response_has_zero_age() {
        let response = AggregatedQuote::new(
            Vec::new(),
            DataOrigin::Live,
            CacheInfo {
                hit: false,
                ttl_secs: 0,
                tier: None,
            },
            PerformanceInfo::default(),
        );
        assert_eq!(response.metadata.data_age_ms, 0);
    }
}
