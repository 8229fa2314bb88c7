//! Database model for cold-store quote records.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

use coinfeed_market_data::models::{Provenance, QualityTier, QuotePoint, Transport};

use crate::errors::StorageError;

/// Database model for one validated quote point.
///
/// Decimals are stored as text to keep full precision. Timestamps are
/// fixed-width RFC 3339 strings so lexical order matches time order.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::quote_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QuoteRecordDB {
    pub symbol: String,
    pub exchange: String,
    pub observed_at: String,
    pub price_usd: String,
    pub price_change_24h: String,
    pub price_change_percent_24h: String,
    pub volume_24h: String,
    pub volume_change_24h: Option<String>,
    pub high_24h: Option<String>,
    pub low_24h: Option<String>,
    pub market_cap: Option<String>,
    pub bid: Option<String>,
    pub ask: Option<String>,
    pub spread_percent: Option<String>,
    pub quality: String,
    pub endpoint: String,
    pub transport: String,
    pub reliability: f64,
    pub latency_ms: i64,
    pub created_at: String,
}

/// Timestamp text as stored in `observed_at` and `created_at`.
pub fn timestamp_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp '{}': {}", text, e)))
}

fn parse_decimal(text: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(text)
        .map_err(|e| StorageError::SerializationError(format!("bad decimal '{}': {}", text, e)))
}

fn parse_optional(text: Option<&str>) -> Result<Option<Decimal>, StorageError> {
    text.map(parse_decimal).transpose()
}

/// Unit enums are stored as their serde name ("HIGH", "REST").
fn enum_text<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => String::new(),
    }
}

fn parse_enum<T: DeserializeOwned>(text: &str) -> Result<T, StorageError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| StorageError::SerializationError(format!("bad value '{}': {}", text, e)))
}

impl From<&QuotePoint> for QuoteRecordDB {
    fn from(point: &QuotePoint) -> Self {
        let text = |d: &Option<Decimal>| d.map(|v| v.to_string());
        Self {
            symbol: point.symbol.clone(),
            exchange: point.exchange.clone(),
            observed_at: timestamp_text(point.observed_at),
            price_usd: point.price_usd.to_string(),
            price_change_24h: point.price_change_24h.to_string(),
            price_change_percent_24h: point.price_change_percent_24h.to_string(),
            volume_24h: point.volume_24h.to_string(),
            volume_change_24h: text(&point.volume_change_24h),
            high_24h: text(&point.high_24h),
            low_24h: text(&point.low_24h),
            market_cap: text(&point.market_cap),
            bid: text(&point.bid),
            ask: text(&point.ask),
            spread_percent: text(&point.spread_percent),
            quality: enum_text(&point.quality),
            endpoint: point.provenance.endpoint.clone(),
            transport: enum_text(&point.provenance.transport),
            reliability: point.provenance.reliability,
            latency_ms: i64::try_from(point.provenance.latency_ms).unwrap_or(i64::MAX),
            created_at: timestamp_text(Utc::now()),
        }
    }
}

impl TryFrom<QuoteRecordDB> for QuotePoint {
    type Error = StorageError;

    fn try_from(row: QuoteRecordDB) -> Result<Self, Self::Error> {
        Ok(QuotePoint {
            price_usd: parse_decimal(&row.price_usd)?,
            price_change_24h: parse_decimal(&row.price_change_24h)?,
            price_change_percent_24h: parse_decimal(&row.price_change_percent_24h)?,
            volume_24h: parse_decimal(&row.volume_24h)?,
            volume_change_24h: parse_optional(row.volume_change_24h.as_deref())?,
            high_24h: parse_optional(row.high_24h.as_deref())?,
            low_24h: parse_optional(row.low_24h.as_deref())?,
            market_cap: parse_optional(row.market_cap.as_deref())?,
            bid: parse_optional(row.bid.as_deref())?,
            ask: parse_optional(row.ask.as_deref())?,
            spread_percent: parse_optional(row.spread_percent.as_deref())?,
            observed_at: parse_timestamp(&row.observed_at)?,
            quality: parse_enum::<QualityTier>(&row.quality)?,
            provenance: Provenance {
                endpoint: row.endpoint,
                transport: parse_enum::<Transport>(&row.transport)?,
                reliability: row.reliability,
                latency_ms: u64::try_from(row.latency_ms).unwrap_or(0),
            },
            symbol: row.symbol,
            exchange: row.exchange,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert!(timestamp_text(early) < timestamp_text(late));
        assert_eq!(timestamp_text(late), "2024-03-01T10:00:00.000000Z");
    }

    #[test]
    fn test_enum_text_uses_serde_names() {
        assert_eq!(enum_text(&QualityTier::Medium), "MEDIUM");
        assert_eq!(parse_enum::<QualityTier>("SUSPECT").unwrap(), QualityTier::Suspect);
        assert!(parse_enum::<QualityTier>("GREAT").is_err());
    }

    #[test]
    fn test_bad_decimal_is_a_serialization_error() {
        assert!(matches!(
            parse_decimal("abc"),
            Err(StorageError::SerializationError(_))
        ));
        assert_eq!(parse_optional(Some("1.50")).unwrap(), Some(dec!(1.50)));
        assert_eq!(parse_optional(None).unwrap(), None);
    }
}
