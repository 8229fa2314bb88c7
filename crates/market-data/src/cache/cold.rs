//! Cold tier: durable history of validated points.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;

use crate::errors::MarketDataError;
use crate::models::{HistoryQuery, QuotePoint, Symbol};

/// Queryable store of historical quote records.
///
/// Records are keyed by (symbol, exchange, observed_at); persisting the same
/// key twice keeps the newer write. Reads are ordered newest first.
#[async_trait]
pub trait ColdStore: Send + Sync {
    /// Persist points. Returns how many rows were written.
    async fn persist(&self, points: &[QuotePoint]) -> Result<usize, MarketDataError>;

    /// Most recent records for `symbols` observed at or after `since`.
    async fn latest_since(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QuotePoint>, MarketDataError>;

    /// Records for one symbol inside `[from, to]`.
    async fn range(&self, query: &HistoryQuery) -> Result<Vec<QuotePoint>, MarketDataError>;
}

type RecordKey = (String, String, DateTime<Utc>);

/// In-memory cold store, for tests and single-process setups without SQLite.
#[derive(Default)]
pub struct MemoryColdStore {
    records: Mutex<BTreeMap<RecordKey, QuotePoint>>,
}

impl MemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_records(&self) -> MutexGuard<'_, BTreeMap<RecordKey, QuotePoint>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            warn!("Cold store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }
}

fn newest_first(mut points: Vec<QuotePoint>, limit: usize) -> Vec<QuotePoint> {
    points.sort_by(|a, b| {
        b.observed_at
            .cmp(&a.observed_at)
            .then_with(|| a.exchange.cmp(&b.exchange))
    });
    points.truncate(limit);
    points
}

#[async_trait]
impl ColdStore for MemoryColdStore {
    async fn persist(&self, points: &[QuotePoint]) -> Result<usize, MarketDataError> {
        let mut records = self.lock_records();
        for point in points {
            records.insert(
                (point.symbol.clone(), point.exchange.clone(), point.observed_at),
                point.clone(),
            );
        }
        Ok(points.len())
    }

    async fn latest_since(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QuotePoint>, MarketDataError> {
        let records = self.lock_records();
        let matching = records
            .values()
            .filter(|p| symbols.contains(&p.symbol) && p.observed_at >= since)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn range(&self, query: &HistoryQuery) -> Result<Vec<QuotePoint>, MarketDataError> {
        let records = self.lock_records();
        let matching = records
            .values()
            .filter(|p| p.symbol == query.symbol)
            .filter(|p| query.exchanges.is_empty() || query.exchanges.contains(&p.exchange))
            .filter(|p| p.observed_at >= query.from && p.observed_at <= query.to)
            .cloned()
            .collect();
        Ok(newest_first(matching, query.limit))
    }
}
