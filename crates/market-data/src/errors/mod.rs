//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`ErrorCode`]: The closed, caller-visible error taxonomy
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-visible error taxonomy.
///
/// Every [`MarketDataError`] maps onto exactly one code, so the coordinator
/// and the circuit breaker can reason about retryability without looking at
/// transport details.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkTimeout,
    ConnectionFailed,
    RateLimited,
    ExchangeUnavailable,
    InvalidSymbol,
    InsufficientPermissions,
}

impl ErrorCode {
    /// Whether a caller may retry the failed operation later.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidSymbol | Self::InsufficientPermissions)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::ExchangeUnavailable => "EXCHANGE_UNAVAILABLE",
            Self::InvalidSymbol => "INVALID_SYMBOL",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during market data operations.
///
/// Each variant is classified into an [`ErrorCode`] via [`code`](Self::code)
/// and a [`RetryClass`] via [`retry_class`](Self::retry_class).
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The request to the exchange timed out (client timeout or the
    /// coordinator's per-call deadline).
    #[error("Timeout: {exchange}")]
    Timeout {
        /// The exchange that timed out
        exchange: String,
    },

    /// The connection to the exchange could not be established or was reset.
    #[error("Connection failed: {exchange} - {message}")]
    ConnectionFailed { exchange: String, message: String },

    /// The exchange rate limited the request (HTTP 429).
    #[error("Rate limited: {exchange}")]
    RateLimited { exchange: String },

    /// The exchange answered with a server error or unusable payload.
    ///
    /// `maintenance` is set when the exchange reported a 503, which the
    /// health check surfaces as MAINTENANCE.
    #[error("Exchange unavailable: {exchange} - {message}")]
    ExchangeUnavailable {
        exchange: String,
        message: String,
        maintenance: bool,
    },

    /// The symbol is unknown to the exchange (HTTP 400/404) or the request
    /// itself is malformed.
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The exchange rejected our credentials (HTTP 401/403).
    #[error("Insufficient permissions: {exchange}")]
    InsufficientPermissions { exchange: String },

    /// The circuit breaker is open for this exchange.
    #[error("Circuit open: {exchange}")]
    CircuitOpen { exchange: String },

    /// Every eligible exchange failed or was skipped and no fallback data
    /// was recent enough.
    #[error("No market data available for {symbols}")]
    AllExchangesFailed { symbols: String },

    /// A cache or cold-store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller passed an unusable argument (empty symbol list, unknown
    /// subscription channel, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl MarketDataError {
    /// Maps this error onto the caller-visible taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::NetworkTimeout,
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::ExchangeUnavailable { .. }
            | Self::CircuitOpen { .. }
            | Self::AllExchangesFailed { .. }
            | Self::Storage(_)
            | Self::Serialization(_) => ErrorCode::ExchangeUnavailable,
            Self::InvalidSymbol(_) | Self::InvalidRequest(_) => ErrorCode::InvalidSymbol,
            Self::InsufficientPermissions { .. } => ErrorCode::InsufficientPermissions,
        }
    }

    /// Whether the caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use coinfeed_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::Timeout { exchange: "binance".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = MarketDataError::InvalidSymbol("NOPE".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionFailed { .. }
            | Self::ExchangeUnavailable { .. } => RetryClass::WithBackoff,

            Self::RateLimited { .. } => RetryClass::FailoverWithPenalty,

            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,

            Self::InvalidSymbol(_)
            | Self::InsufficientPermissions { .. }
            | Self::InvalidRequest(_)
            | Self::AllExchangesFailed { .. }
            | Self::Storage(_)
            | Self::Serialization(_) => RetryClass::Never,
        }
    }

    /// Whether this failure should count against the exchange's circuit.
    ///
    /// Unknown symbols say nothing about the exchange's health.
    pub fn penalizes_exchange(&self) -> bool {
        !matches!(
            self,
            Self::InvalidSymbol(_) | Self::InvalidRequest(_) | Self::CircuitOpen { .. }
        )
    }

    /// Builds the error for an HTTP status the exchange answered with.
    pub fn from_status(exchange: &str, status: reqwest::StatusCode, body: &str) -> Self {
        use reqwest::StatusCode;

        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                exchange: exchange.to_string(),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::InsufficientPermissions {
                exchange: exchange.to_string(),
            },
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Self::InvalidSymbol(format!("{}: {}", exchange, truncate(body, 200)))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout {
                exchange: exchange.to_string(),
            },
            s => Self::ExchangeUnavailable {
                exchange: exchange.to_string(),
                message: format!("HTTP {} - {}", s, truncate(body, 200)),
                maintenance: s == StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Builds the error for a transport-level reqwest failure.
    pub fn from_transport(exchange: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                exchange: exchange.to_string(),
            }
        } else if err.is_decode() {
            Self::ExchangeUnavailable {
                exchange: exchange.to_string(),
                message: format!("Malformed response: {}", err),
                maintenance: false,
            }
        } else {
            Self::ConnectionFailed {
                exchange: exchange.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_codes_carry_retryable_flag() {
        assert!(ErrorCode::NetworkTimeout.is_retryable());
        assert!(ErrorCode::ConnectionFailed.is_retryable());
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::ExchangeUnavailable.is_retryable());
        assert!(!ErrorCode::InvalidSymbol.is_retryable());
        assert!(!ErrorCode::InsufficientPermissions.is_retryable());
    }

    #[test]
    fn test_timeout_retries_with_backoff() {
        let error = MarketDataError::Timeout {
            exchange: "binance".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
        assert_eq!(error.code(), ErrorCode::NetworkTimeout);
    }

    #[test]
    fn test_rate_limited_is_penalized_not_retried() {
        let error = MarketDataError::RateLimited {
            exchange: "luno".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
        assert!(error.is_retryable());
        assert!(error.penalizes_exchange());
    }

    #[test]
    fn test_invalid_symbol_never_retries() {
        let error = MarketDataError::InvalidSymbol("DOGEZAR".to_string());
        assert_eq!(error.retry_class(), RetryClass::Never);
        assert!(!error.is_retryable());
        assert!(!error.penalizes_exchange());
    }

    #[test]
    fn test_status_classification() {
        let err = MarketDataError::from_status("binance", StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.code(), ErrorCode::RateLimited);

        let err = MarketDataError::from_status("binance", StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.code(), ErrorCode::InsufficientPermissions);

        let err = MarketDataError::from_status("binance", StatusCode::NOT_FOUND, "no such pair");
        assert_eq!(err.code(), ErrorCode::InvalidSymbol);

        let err = MarketDataError::from_status("binance", StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.code(), ErrorCode::ExchangeUnavailable);
        assert_eq!(err.retry_class(), RetryClass::WithBackoff);
    }

    #[test]
    fn test_503_marks_maintenance() {
        let err = MarketDataError::from_status("luno", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(
            err,
            MarketDataError::ExchangeUnavailable {
                maintenance: true,
                ..
            }
        ));
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::InvalidSymbol("FOO".to_string());
        assert_eq!(format!("{}", error), "Invalid symbol: FOO");

        let error = MarketDataError::ExchangeUnavailable {
            exchange: "luno".to_string(),
            message: "HTTP 500".to_string(),
            maintenance: false,
        };
        assert_eq!(format!("{}", error), "Exchange unavailable: luno - HTTP 500");
        assert_eq!(ErrorCode::ExchangeUnavailable.to_string(), "EXCHANGE_UNAVAILABLE");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
