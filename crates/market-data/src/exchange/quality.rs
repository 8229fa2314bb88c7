//! Provisional quality scoring done by adapters.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::models::{QualityTier, QuotePoint};

/// Observations older than this are at best LOW before validation even runs.
const PROVISIONAL_STALE_AFTER_SECS: i64 = 300;

/// Tier an adapter assigns from field completeness and recency.
///
/// - SUSPECT: no positive price
/// - LOW: older than five minutes
/// - MEDIUM: volume, high or low missing
/// - HIGH: everything present and recent
pub fn provisional_quality(point: &QuotePoint, now: DateTime<Utc>) -> QualityTier {
    if point.price_usd <= Decimal::ZERO {
        return QualityTier::Suspect;
    }
    if point.age(now) > Duration::seconds(PROVISIONAL_STALE_AFTER_SECS) {
        return QualityTier::Low;
    }
    let complete =
        point.volume_24h > Decimal::ZERO && point.high_24h.is_some() && point.low_24h.is_some();
    if complete {
        QualityTier::High
    } else {
        QualityTier::Medium
    }
}

/// Stamps the provisional tier on a freshly parsed point.
pub fn score(point: QuotePoint) -> QuotePoint {
    let tier = provisional_quality(&point, Utc::now());
    QuotePoint {
        quality: tier,
        ..point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_point;
    use rust_decimal_macros::dec;

    #[test]
    fn test_complete_recent_point_is_high() {
        let point = sample_point("BTC", "binance", dec!(45000));
        assert_eq!(provisional_quality(&point, Utc::now()), QualityTier::High);
    }

    #[test]
    fn test_missing_range_is_medium() {
        let mut point = sample_point("BTC", "luno", dec!(45000));
        point.high_24h = None;
        point.low_24h = None;
        assert_eq!(provisional_quality(&point, Utc::now()), QualityTier::Medium);
    }

    #[test]
    fn test_old_point_is_low() {
        let mut point = sample_point("BTC", "luno", dec!(45000));
        point.observed_at = Utc::now() - Duration::minutes(10);
        assert_eq!(provisional_quality(&point, Utc::now()), QualityTier::Low);
    }

    #[test]
    fn test_zero_price_is_suspect() {
        let point = score(sample_point("BTC", "luno", Decimal::ZERO));
        assert_eq!(point.quality, QualityTier::Suspect);
    }
}
