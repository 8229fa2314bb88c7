//! Deterministic cache keys.
//!
//! `{type}:{symbols}:{hash}` where symbols are upper-cased, de-duplicated and
//! sorted, and hash is the MD5 of the canonical JSON of the options.

use serde::Serialize;

use crate::models::{canonical_symbol, HistoricalOptions, QueryOptions, TimeInterval};

const MARKET_DATA_PREFIX: &str = "market_data";
const HISTORICAL_PREFIX: &str = "historical";

fn options_hash<T: Serialize>(options: &T) -> String {
    // Serializing a plain struct cannot fail; fall back to an empty document anyway.
    let json = serde_json::to_string(options).unwrap_or_default();
    format!("{:x}", md5::compute(json.as_bytes()))
}

/// Upper-cased, de-duplicated, sorted symbol list.
pub fn canonical_symbols<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    let mut list: Vec<String> = symbols
        .iter()
        .map(|s| canonical_symbol(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect();
    list.sort();
    list.dedup();
    list
}

pub fn market_data_key<S: AsRef<str>>(symbols: &[S], options: &QueryOptions) -> String {
    format!(
        "{}:{}:{}",
        MARKET_DATA_PREFIX,
        canonical_symbols(symbols).join(","),
        options_hash(&options.canonical())
    )
}

pub fn historical_key(symbol: &str, interval: TimeInterval, options: &HistoricalOptions) -> String {
    let mut options = options.clone();
    options.exchanges = canonical_symbols(&options.exchanges)
        .into_iter()
        .map(|e| e.to_lowercase())
        .collect();
    format!(
        "{}:{}:{}:{}",
        HISTORICAL_PREFIX,
        canonical_symbol(symbol),
        interval,
        options_hash(&options)
    )
}
