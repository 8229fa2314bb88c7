use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};

use coinfeed_market_data::models::{HistoryQuery, QuotePoint, Symbol};
use coinfeed_market_data::{ColdStore, MarketDataError};

use super::model::{timestamp_text, QuoteRecordDB};
use crate::db::{self, get_connection, DbPool, WriteHandle};
use crate::errors::{IntoMarketData, StorageError};
use crate::schema::quote_records::dsl as records_dsl;
use crate::utils::chunk_for_sqlite;

/// Rows per INSERT statement; 20 columns each keeps us under SQLite's
/// parameter limit.
const INSERT_CHUNK: usize = 40;

/// Cold store backed by SQLite.
///
/// Writes are serialized through the writer actor; reads run on the blocking
/// pool with their own pooled connection.
pub struct SqliteColdStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteColdStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Open (or create) the database at `db_path`, apply migrations and start
    /// the writer. Must be called inside a Tokio runtime.
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        let db_path = db::init(db_path)?;
        let pool = db::create_pool(&db_path)?;
        db::run_migrations(&pool)?;
        let writer = db::spawn_writer(&pool)?;
        Ok(Self::new(pool, writer))
    }

    /// Run a read on the blocking pool.
    async fn read<T, F>(&self, query: F) -> Result<T, MarketDataError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            query(&mut conn)
        })
        .await
        .map_err(|e| StorageError::WorkerUnavailable(e.to_string()))
        .into_market_data()?
        .into_market_data()
    }

    /// Delete records observed before `cutoff`. Returns how many were removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MarketDataError> {
        let cutoff = timestamp_text(cutoff);
        let removed = self
            .writer
            .exec(move |conn| {
                let stale = records_dsl::quote_records.filter(records_dsl::observed_at.lt(cutoff));
                Ok(diesel::delete(stale).execute(conn)?)
            })
            .await
            .into_market_data()?;
        if removed > 0 {
            debug!("Pruned {} cold quote records", removed);
        }
        Ok(removed)
    }

    /// Total number of stored records.
    pub async fn count(&self) -> Result<i64, MarketDataError> {
        self.read(|conn| Ok(records_dsl::quote_records.count().get_result(conn)?))
            .await
    }
}

fn into_points(rows: Vec<QuoteRecordDB>) -> Vec<QuotePoint> {
    rows.into_iter()
        .filter_map(|row| match QuotePoint::try_from(row) {
            Ok(point) => Some(point),
            Err(e) => {
                warn!("Skipping unreadable cold record: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ColdStore for SqliteColdStore {
    async fn persist(&self, points: &[QuotePoint]) -> Result<usize, MarketDataError> {
        if points.is_empty() {
            return Ok(0);
        }
        let rows: Vec<QuoteRecordDB> = points.iter().map(QuoteRecordDB::from).collect();

        self.writer
            .exec(move |conn| {
                let mut written = 0;
                for chunk in rows.chunks(INSERT_CHUNK) {
                    written += diesel::replace_into(records_dsl::quote_records)
                        .values(chunk)
                        .execute(conn)?;
                }
                Ok(written)
            })
            .await
            .into_market_data()
    }

    async fn latest_since(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QuotePoint>, MarketDataError> {
        if symbols.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let symbols = symbols.to_vec();
        let since = timestamp_text(since);
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut rows = self
            .read(move |conn| {
                let mut rows = Vec::new();
                for chunk in chunk_for_sqlite(&symbols) {
                    let found = records_dsl::quote_records
                        .select(QuoteRecordDB::as_select())
                        .filter(records_dsl::symbol.eq_any(chunk))
                        .filter(records_dsl::observed_at.ge(&since))
                        .order((records_dsl::observed_at.desc(), records_dsl::exchange.asc()))
                        .limit(limit_i64)
                        .load::<QuoteRecordDB>(conn)?;
                    rows.extend(found);
                }
                Ok(rows)
            })
            .await?;

        // Chunks are ordered independently; merge them.
        rows.sort_by(|a, b| {
            b.observed_at
                .cmp(&a.observed_at)
                .then_with(|| a.exchange.cmp(&b.exchange))
        });
        rows.truncate(limit);
        Ok(into_points(rows))
    }

    async fn range(&self, query: &HistoryQuery) -> Result<Vec<QuotePoint>, MarketDataError> {
        let symbol = query.symbol.clone();
        let exchanges = query.exchanges.clone();
        let from = timestamp_text(query.from);
        let to = timestamp_text(query.to);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = self
            .read(move |conn| {
                let mut select = records_dsl::quote_records
                    .select(QuoteRecordDB::as_select())
                    .filter(records_dsl::symbol.eq(symbol))
                    .filter(records_dsl::observed_at.ge(from))
                    .filter(records_dsl::observed_at.le(to))
                    .into_boxed();
                if !exchanges.is_empty() {
                    select = select.filter(records_dsl::exchange.eq_any(exchanges));
                }
                Ok(select
                    .order((records_dsl::observed_at.desc(), records_dsl::exchange.asc()))
                    .limit(limit)
                    .load::<QuoteRecordDB>(conn)?)
            })
            .await?;

        Ok(into_points(rows))
    }
}
