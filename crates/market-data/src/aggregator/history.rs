//! Historical range resolution and candle bucketing.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::config::HistoryConfig;
use crate::errors::MarketDataError;
use crate::models::{HistoricalOptions, HistoricalPoint, HistoryQuery, QuotePoint, TimeInterval};

/// Turn caller options into a bounded cold-store query.
///
/// The end defaults to `now`, the start to the maximum window before the
/// end. Windows wider than the maximum are clipped at the start.
pub fn resolve_query(
    symbol: &str,
    options: &HistoricalOptions,
    config: &HistoryConfig,
    now: DateTime<Utc>,
) -> Result<HistoryQuery, MarketDataError> {
    let max_window = Duration::days(config.max_history_window_days.max(1));
    let to = options.end_time.unwrap_or(now);
    let mut from = options.start_time.unwrap_or(to - max_window);

    if from > to {
        return Err(MarketDataError::InvalidRequest(format!(
            "start_time {} is after end_time {}",
            from, to
        )));
    }
    if to - from > max_window {
        from = to - max_window;
    }

    let mut exchanges: Vec<String> = options
        .exchanges
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    exchanges.sort();
    exchanges.dedup();

    Ok(HistoryQuery {
        symbol: symbol.to_string(),
        exchanges,
        from,
        to,
        limit: config.max_history_rows,
    })
}

/// Fold raw points into one OHLC candle per (exchange, bucket).
///
/// Prices come from each point's `price_usd` in observation order. Volume is
/// the rolling 24h volume reported by the last point of the bucket, or zero
/// when `include_volume` is off. Candles are returned newest first.
pub fn bucket_candles(
    points: &[QuotePoint],
    interval: TimeInterval,
    include_volume: bool,
) -> Vec<HistoricalPoint> {
    let mut ordered: Vec<&QuotePoint> = points.iter().collect();
    ordered.sort_by_key(|p| p.observed_at);

    let mut buckets: BTreeMap<(DateTime<Utc>, String), HistoricalPoint> = BTreeMap::new();
    for point in ordered {
        let start = interval.bucket_start(point.observed_at);
        let volume = if include_volume {
            point.volume_24h
        } else {
            Decimal::ZERO
        };
        buckets
            .entry((start, point.exchange.clone()))
            .and_modify(|candle| {
                candle.high = candle.high.max(point.price_usd);
                candle.low = candle.low.min(point.price_usd);
                candle.close = point.price_usd;
                candle.volume = volume;
            })
            .or_insert_with(|| HistoricalPoint {
                timestamp: start,
                open: point.price_usd,
                high: point.price_usd,
                low: point.price_usd,
                close: point.price_usd,
                volume,
                exchange: point.exchange.clone(),
                interval,
            });
    }

    buckets.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_point;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(exchange: &str, price: Decimal, h: u32, m: u32) -> QuotePoint {
        let mut point = sample_point("BTC", exchange, price);
        point.observed_at = Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap();
        point.volume_24h = price * dec!(10);
        point
    }

    #[test]
    fn test_candles_per_exchange_and_bucket() {
        let points = vec![
            at("binance", dec!(101), 10, 40),
            at("binance", dec!(100), 10, 5),
            at("binance", dec!(104), 10, 20),
            at("binance", dec!(99), 10, 30),
            at("binance", dec!(110), 11, 1),
            at("luno", dec!(102), 10, 15),
        ];

        let candles = bucket_candles(&points, TimeInterval::OneHour, true);
        assert_eq!(candles.len(), 3);

        assert_eq!(candles[0].exchange, "binance");
        assert_eq!(candles[0].open, dec!(110));

        let ten = candles
            .iter()
            .find(|c| c.exchange == "binance" && c.timestamp.format("%H").to_string() == "10")
            .unwrap();
        assert_eq!(ten.open, dec!(100));
        assert_eq!(ten.high, dec!(104));
        assert_eq!(ten.low, dec!(99));
        assert_eq!(ten.close, dec!(101));
        assert_eq!(ten.volume, dec!(1010));
        assert_eq!(ten.interval, TimeInterval::OneHour);
    }

    #[test]
    fn test_volume_can_be_excluded() {
        let candles = bucket_candles(&[at("binance", dec!(100), 10, 5)], TimeInterval::OneHour, false);
        assert_eq!(candles[0].volume, Decimal::ZERO);
    }

    #[test]
    fn test_window_is_clipped_to_maximum() {
        let now = Utc::now();
        let options = HistoricalOptions {
            start_time: Some(now - Duration::days(90)),
            exchanges: vec!["Binance".to_string(), "binance".to_string()],
            ..Default::default()
        };
        let query = resolve_query("BTC", &options, &HistoryConfig::default(), now).unwrap();

        assert_eq!(query.to, now);
        assert_eq!(query.to - query.from, Duration::days(30));
        assert_eq!(query.exchanges, vec!["binance".to_string()]);
        assert_eq!(query.limit, 1_000);
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let now = Utc::now();
        let options = HistoricalOptions {
            start_time: Some(now),
            end_time: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            resolve_query("BTC", &options, &HistoryConfig::default(), now),
            Err(MarketDataError::InvalidRequest(_))
        ));
    }
}
