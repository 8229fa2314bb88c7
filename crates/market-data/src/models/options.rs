use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::TimeInterval;

/// Field used to order the points of a market data response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Symbol,
    Price,
    Volume,
    Change,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Caller options for `get_market_data`.
///
/// The canonical JSON of these options is part of the cache key, so two
/// requests only share a cache entry when their options are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Restrict the fan-out to these exchange ids; `None` means all configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanges: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortField>,

    #[serde(default)]
    pub sort_order: SortOrder,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,

    /// Skip the hot and warm tiers and fetch fresh data.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_refresh: bool,
}

impl QueryOptions {
    pub fn for_exchanges<I, S>(exchanges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exchanges: Some(exchanges.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Options with the exchange list lower-cased, sorted and de-duplicated,
    /// and `force_refresh` cleared, as used for cache keys.
    pub fn canonical(&self) -> Self {
        let exchanges = self.exchanges.as_ref().map(|list| {
            let mut list: Vec<String> = list.iter().map(|e| e.trim().to_lowercase()).collect();
            list.sort();
            list.dedup();
            list
        });
        Self {
            exchanges,
            force_refresh: false,
            ..self.clone()
        }
    }
}

/// Caller options for `get_historical_data`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoricalOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Empty means every exchange
    #[serde(default)]
    pub exchanges: Vec<String>,

    #[serde(default = "default_include_volume")]
    pub include_volume: bool,

    /// Candle width; defaults to the requested interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<TimeInterval>,
}

fn default_include_volume() -> bool {
    true
}

impl Default for HistoricalOptions {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            exchanges: Vec::new(),
            include_volume: true,
            granularity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sorts_exchanges() {
        let a = QueryOptions::for_exchanges(["Luno", "binance", "luno"]);
        let b = QueryOptions::for_exchanges(["binance", "luno"]);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_force_refresh_not_part_of_canonical_form() {
        let forced = QueryOptions {
            force_refresh: true,
            ..Default::default()
        };
        assert_eq!(forced.canonical(), QueryOptions::default());
    }

    #[test]
    fn test_historical_defaults_include_volume() {
        let options: HistoricalOptions = serde_json::from_str("{}").unwrap();
        assert!(options.include_volume);
        assert!(options.exchanges.is_empty());
    }
}
