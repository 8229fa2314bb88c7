//! Per-exchange circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to keep a failing exchange out of
//! the fan-out pool. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Exchange is failing, requests are blocked.
//! - **HalfOpen**: One probing request is allowed to test recovery.
//!
//! The circuit breaker is in-memory and resets on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Exchange is failing - requests are blocked.
    Open,
    /// Testing recovery - a single probe is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Internal circuit state for a single exchange.
#[derive(Debug)]
struct Circuit {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Number of consecutive failures.
    consecutive_failures: u32,
    /// Time of the last failure (for recovery timeout).
    last_failure: Option<Instant>,
    /// Wall-clock twin of `last_failure`, for snapshots.
    last_failure_at: Option<DateTime<Utc>>,
    /// Set while the single HalfOpen probe is outstanding.
    probe_in_flight: bool,
}

impl Circuit {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.last_failure_at = None;
        self.probe_in_flight = false;
    }
}

/// Point-in-time view of one circuit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub exchange: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Registry of per-exchange circuit breakers.
///
/// Thread-safe. Each exchange is registered with its own thresholds;
/// unregistered exchanges get a circuit with the default configuration the
/// first time they are seen.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker whose lazily created circuits use `config`.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    ///
    /// The worst case of a poisoned lock is slightly stale circuit state,
    /// which beats panicking in the request path.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register an exchange with its own thresholds. Existing state is kept,
    /// only the thresholds are replaced.
    pub fn register(&self, exchange: &str, config: CircuitBreakerConfig) {
        let mut circuits = self.lock_circuits();
        circuits
            .entry(exchange.to_string())
            .and_modify(|c| c.config = config.clone())
            .or_insert_with(|| Circuit::new(config));
    }

    /// Check whether a request to `exchange` may go out now.
    ///
    /// - Closed: always allowed.
    /// - Open: allowed once `recovery_timeout` has elapsed since the last
    ///   failure; the circuit moves to HalfOpen and this caller holds the probe.
    /// - HalfOpen: allowed only if no probe is outstanding.
    pub fn is_allowed(&self, exchange: &str) -> bool {
        let mut circuits = self.lock_circuits();
        let default_config = &self.default_config;
        let circuit = circuits
            .entry(exchange.to_string())
            .or_insert_with(|| Circuit::new(default_config.clone()));

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let recovered = circuit
                    .last_failure
                    .map(|t| t.elapsed() >= circuit.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        exchange
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request. Any success closes the circuit and
    /// resets the failure counter.
    pub fn record_success(&self, exchange: &str) {
        let mut circuits = self.lock_circuits();
        let Some(circuit) = circuits.get_mut(exchange) else {
            return;
        };

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures > 0 {
                    debug!(
                        "Circuit breaker: success for '{}', failure count reset",
                        exchange
                    );
                }
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                info!("Circuit breaker: closing circuit for '{}'", exchange);
                circuit.close();
            }
        }
    }

    /// Record a failed request.
    ///
    /// Increments the failure count and may open the circuit. In HalfOpen,
    /// a failure reopens the circuit immediately.
    pub fn record_failure(&self, exchange: &str) {
        let mut circuits = self.lock_circuits();
        let default_config = &self.default_config;
        let circuit = circuits
            .entry(exchange.to_string())
            .or_insert_with(|| Circuit::new(default_config.clone()));

        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_failure = Some(Instant::now());
        circuit.last_failure_at = Some(Utc::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= circuit.config.failure_threshold {
                    warn!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        exchange, circuit.consecutive_failures
                    );
                    circuit.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        exchange, circuit.consecutive_failures, circuit.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed probe",
                    exchange
                );
                circuit.state = CircuitState::Open;
                circuit.probe_in_flight = false;
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    exchange
                );
            }
        }
    }

    /// Release a HalfOpen probe whose outcome says nothing about the
    /// exchange's health (for example an unknown symbol).
    pub fn release_probe(&self, exchange: &str) {
        let mut circuits = self.lock_circuits();
        if let Some(circuit) = circuits.get_mut(exchange) {
            circuit.probe_in_flight = false;
        }
    }

    /// Get the current state for an exchange.
    pub fn state(&self, exchange: &str) -> CircuitState {
        self.lock_circuits()
            .get(exchange)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the consecutive failure count for an exchange.
    pub fn failure_count(&self, exchange: &str) -> u32 {
        self.lock_circuits()
            .get(exchange)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    /// Reset the circuit for an exchange to Closed state.
    pub fn reset(&self, exchange: &str) {
        if let Some(circuit) = self.lock_circuits().get_mut(exchange) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                exchange
            );
            circuit.close();
        }
    }

    /// Snapshot of every known circuit, sorted by exchange id.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.lock_circuits();
        let mut snapshot: Vec<_> = circuits
            .iter()
            .map(|(exchange, circuit)| CircuitSnapshot {
                exchange: exchange.clone(),
                state: circuit.state,
                consecutive_failures: circuit.consecutive_failures,
                last_failure: circuit.last_failure_at,
            })
            .collect();
        snapshot.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        snapshot
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new();

        assert!(cb.is_allowed("binance"));
        assert_eq!(cb.state("binance"), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::new();
        cb.register(
            "luno",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
            },
        );

        cb.record_failure("luno");
        cb.record_failure("luno");
        assert!(cb.is_allowed("luno"));
        assert_eq!(cb.state("luno"), CircuitState::Closed);

        cb.record_failure("luno");
        assert!(!cb.is_allowed("luno"));
        assert_eq!(cb.state("luno"), CircuitState::Open);
    }

    #[test]
    fn test_six_failures_with_threshold_five_opens() {
        let cb = CircuitBreaker::new();
        cb.register("binance", CircuitBreakerConfig::default());

        for _ in 0..6 {
            cb.record_failure("binance");
        }

        assert_eq!(cb.state("binance"), CircuitState::Open);
        assert_eq!(cb.failure_count("binance"), 6);
        assert!(!cb.is_allowed("binance"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new();
        cb.register("binance", fast_config(3));

        cb.record_failure("binance");
        cb.record_failure("binance");
        assert_eq!(cb.failure_count("binance"), 2);

        cb.record_success("binance");
        assert_eq!(cb.failure_count("binance"), 0);
    }

    #[test]
    fn test_half_open_allows_single_probe() {
        let cb = CircuitBreaker::new();
        cb.register("binance", fast_config(1));

        cb.record_failure("binance");
        assert!(!cb.is_allowed("binance"));

        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.is_allowed("binance"));
        assert_eq!(cb.state("binance"), CircuitState::HalfOpen);
        // Probe outstanding, everyone else waits
        assert!(!cb.is_allowed("binance"));
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let cb = CircuitBreaker::new();
        cb.register("binance", fast_config(1));

        cb.record_failure("binance");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_allowed("binance"));

        cb.record_success("binance");
        assert_eq!(cb.state("binance"), CircuitState::Closed);
        assert_eq!(cb.failure_count("binance"), 0);
        assert!(cb.is_allowed("binance"));
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new();
        cb.register("luno", fast_config(1));

        cb.record_failure("luno");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_allowed("luno"));

        cb.record_failure("luno");
        assert_eq!(cb.state("luno"), CircuitState::Open);
        assert!(!cb.is_allowed("luno"));
    }

    #[test]
    fn test_released_probe_can_be_retaken() {
        let cb = CircuitBreaker::new();
        cb.register("luno", fast_config(1));

        cb.record_failure("luno");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_allowed("luno"));

        cb.release_probe("luno");
        assert_eq!(cb.state("luno"), CircuitState::HalfOpen);
        assert!(cb.is_allowed("luno"));
    }

    #[test]
    fn test_manual_reset() {
        let cb = CircuitBreaker::with_config(fast_config(1));

        cb.record_failure("binance");
        assert_eq!(cb.state("binance"), CircuitState::Open);

        cb.reset("binance");
        assert_eq!(cb.state("binance"), CircuitState::Closed);
        assert_eq!(cb.failure_count("binance"), 0);
    }

    #[test]
    fn test_exchange_isolation() {
        let cb = CircuitBreaker::with_config(fast_config(1));

        cb.record_failure("binance");
        assert_eq!(cb.state("binance"), CircuitState::Open);

        assert!(cb.is_allowed("luno"));
        assert_eq!(cb.state("luno"), CircuitState::Closed);
    }

    #[test]
    fn test_snapshot() {
        let cb = CircuitBreaker::new();
        cb.register("luno", CircuitBreakerConfig::default());
        cb.record_failure("binance");
        cb.record_failure("binance");

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].exchange, "binance");
        assert_eq!(snapshot[0].consecutive_failures, 2);
        assert!(snapshot[0].last_failure.is_some());
        assert_eq!(snapshot[1].state, CircuitState::Closed);
    }
}
