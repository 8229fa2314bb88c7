//! Shared HTTP plumbing for exchange adapters.
//!
//! Every request goes through the exchange's rate limiter slot, is retried
//! with exponential backoff when the failure is transient, and feeds the
//! rolling health figures reported by `health_check`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{ExchangeConfig, RetryPolicy};
use crate::errors::{MarketDataError, RetryClass};
use crate::models::{ExchangeHealth, HealthStatus, Provenance, Transport};
use crate::registry::RateLimiter;

/// Latency samples kept for the rolling average.
const LATENCY_WINDOW: usize = 50;

/// Default consecutive-failure count above which an exchange is UNHEALTHY.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// A decoded response together with the time the successful attempt took.
#[derive(Debug)]
pub struct Timed<T> {
    pub value: T,
    pub latency_ms: u64,
}

/// Rolling request statistics for one exchange.
#[derive(Debug, Default)]
struct HealthTracker {
    latencies: VecDeque<u64>,
    total_requests: u64,
    successful_requests: u64,
    consecutive_failures: u32,
    maintenance: bool,
    last_check: Option<DateTime<Utc>>,
}

impl HealthTracker {
    fn record_success(&mut self, latency_ms: u64) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.maintenance = false;
        self.last_check = Some(Utc::now());
    }

    fn record_failure(&mut self, error: &MarketDataError) {
        self.total_requests += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.maintenance = matches!(
            error,
            MarketDataError::ExchangeUnavailable {
                maintenance: true,
                ..
            }
        );
        self.last_check = Some(Utc::now());
    }

    fn snapshot(&self, unhealthy_threshold: u32) -> ExchangeHealth {
        let avg_response_time_ms = if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<u64>() as f64 / self.latencies.len() as f64
        };
        let uptime_percent = if self.total_requests == 0 {
            100.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        };
        let status = if self.maintenance {
            HealthStatus::Maintenance
        } else if self.consecutive_failures > unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if self.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        ExchangeHealth {
            status,
            avg_response_time_ms,
            uptime_percent,
            consecutive_failures: self.consecutive_failures,
            last_check: self.last_check.unwrap_or_else(Utc::now),
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or
/// `policy.max_retries` retries are spent. Only `RetryClass::WithBackoff`
/// errors are retried; the wait before retry `n` is `policy.delay_for(n)`.
async fn with_retry<T, F, Fut>(
    exchange: &str,
    endpoint: &str,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, MarketDataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MarketDataError>>,
{
    let mut retries: u32 = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.retry_class() == RetryClass::WithBackoff;
                if !retryable || retries >= policy.max_retries {
                    return Err(err);
                }
                retries += 1;
                let delay = policy.delay_for(retries);
                debug!(
                    exchange,
                    endpoint,
                    attempt = retries,
                    ?delay,
                    error = %err,
                    "Retrying exchange request"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// HTTP client shared by one adapter's requests.
pub struct ExchangeClient {
    exchange: String,
    base_url: String,
    http: Client,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    reliability: f64,
    unhealthy_threshold: u32,
    health: Mutex<HealthTracker>,
}

impl ExchangeClient {
    /// Builds a client for `config`, registering its budget with the limiter.
    pub fn new(
        config: &ExchangeConfig,
        default_base_url: &str,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, MarketDataError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("coinfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MarketDataError::ConnectionFailed {
                exchange: config.id.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        rate_limiter.configure(&config.id, config.requests_per_minute);
        debug!(
            exchange = %config.id,
            min_interval = ?rate_limiter.interval(&config.id),
            "Exchange client rate limit configured"
        );

        Ok(Self {
            exchange: config.id.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            http,
            rate_limiter,
            retry: config.retry.clone(),
            reliability: config.reliability,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            health: Mutex::new(HealthTracker::default()),
        })
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn lock_health(&self) -> MutexGuard<'_, HealthTracker> {
        self.health.lock().unwrap_or_else(|poisoned| {
            warn!("Health tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// GET `endpoint` and decode JSON, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Timed<T>, MarketDataError> {
        with_retry(&self.exchange, endpoint, &self.retry, || {
            self.send_once(endpoint, params)
        })
        .await
    }

    /// Single rate-limited attempt without retries, for health probes.
    pub async fn probe(&self, endpoint: &str) -> Result<u64, MarketDataError> {
        self.send_once::<serde_json::Value>(endpoint, &[])
            .await
            .map(|timed| timed.latency_ms)
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Timed<T>, MarketDataError> {
        self.rate_limiter.acquire(&self.exchange).await;

        let url = format!("{}{}", self.base_url, endpoint);
        let started = Instant::now();
        let result = self.execute(&url, params).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut health = self.lock_health();
        match &result {
            Ok(_) => health.record_success(latency_ms),
            Err(err) => health.record_failure(err),
        }
        drop(health);

        result.map(|value| Timed { value, latency_ms })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, MarketDataError> {
        debug!(exchange = %self.exchange, url, "Exchange request");

        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| MarketDataError::from_transport(&self.exchange, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::from_status(&self.exchange, status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| MarketDataError::from_transport(&self.exchange, &e))?;

        serde_json::from_str(&body).map_err(|e| MarketDataError::ExchangeUnavailable {
            exchange: self.exchange.clone(),
            message: format!("Malformed response: {}", e),
            maintenance: false,
        })
    }

    /// Rolling health figures.
    pub fn health(&self) -> ExchangeHealth {
        self.lock_health().snapshot(self.unhealthy_threshold)
    }

    /// Provenance stamped on points produced by a REST call.
    pub fn provenance(&self, endpoint: &str, latency_ms: u64) -> Provenance {
        Provenance {
            endpoint: endpoint.to_string(),
            transport: Transport::Rest,
            reliability: self.reliability,
            latency_ms,
        }
    }
}
