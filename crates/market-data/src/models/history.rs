use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Symbol;

/// Candle width for historical queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TimeInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl TimeInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::OneHour => 3_600,
            Self::FourHours => 4 * 3_600,
            Self::OneDay => 86_400,
            Self::OneWeek => 7 * 86_400,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Start of the bucket containing `ts`, aligned to the Unix epoch.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let start = secs - secs.rem_euclid(self.seconds());
        Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            "1w" => Ok(Self::OneWeek),
            other => Err(format!("Unknown interval: {}", other)),
        }
    }
}

/// One OHLC candle for one exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    /// Bucket start
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub exchange: String,
    pub interval: TimeInterval,
}

/// Range scan against the cold store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    pub symbol: Symbol,
    /// Empty means every exchange
    pub exchanges: Vec<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_alignment() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 10, 47, 31).unwrap();

        assert_eq!(
            TimeInterval::FifteenMinutes.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 45, 0).unwrap()
        );
        assert_eq!(
            TimeInterval::OneHour.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
        );
        assert_eq!(
            TimeInterval::OneDay.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_interval_parse_and_serde() {
        assert_eq!("4h".parse::<TimeInterval>().unwrap(), TimeInterval::FourHours);
        assert!("2h".parse::<TimeInterval>().is_err());

        let json = serde_json::to_string(&TimeInterval::OneWeek).unwrap();
        assert_eq!(json, "\"1w\"");
    }
}
