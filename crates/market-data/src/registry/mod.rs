//! Exchange registry module.
//!
//! This module provides the per-exchange guard rails used by the coordinator:
//! - Circuit breaking for fault tolerance
//! - Rate limiting per exchange
//! - Quote data quality validation

mod circuit_breaker;
mod rate_limiter;
mod validator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use rate_limiter::RateLimiter;
pub use validator::{DataQualityValidator, QualityCheck, ValidationIssue, ValidationOutcome};
