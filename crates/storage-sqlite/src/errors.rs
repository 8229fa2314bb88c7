//! Storage-specific error types for SQLite operations.
//!
//! This module wraps Diesel and r2d2 errors and converts them to the
//! engine's [`MarketDataError`] at the crate boundary.

use coinfeed_market_data::MarketDataError;
use diesel::result::Error as DieselError;
use thiserror::Error;

/// Storage-specific errors that wrap Diesel and r2d2 types.
///
/// These errors are internal to the storage layer and are converted to
/// `MarketDataError::Storage` before being returned to the engine.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer actor is gone or a blocking read was cancelled.
    #[error("Storage worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl From<StorageError> for MarketDataError {
    fn from(err: StorageError) -> Self {
        MarketDataError::Storage(err.to_string())
    }
}

/// Extension trait for converting storage Results at the crate boundary.
///
/// This provides a `.into_market_data()` method on any result whose error
/// converts into [`StorageError`].
pub trait IntoMarketData<T> {
    fn into_market_data(self) -> Result<T, MarketDataError>;
}

impl<T, E> IntoMarketData<T> for Result<T, E>
where
    E: Into<StorageError>,
{
    fn into_market_data(self) -> Result<T, MarketDataError> {
        self.map_err(|e| MarketDataError::from(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinfeed_market_data::ErrorCode;

    #[test]
    fn test_storage_errors_surface_as_storage() {
        let result: Result<(), DieselError> = Err(DieselError::NotFound);
        let err = result.into_market_data().unwrap_err();

        assert!(matches!(err, MarketDataError::Storage(_)));
        assert_eq!(err.code(), ErrorCode::ExchangeUnavailable);
    }
}
