//! Background tasks owned by the aggregator.
//!
//! Every task holds a `Weak` reference to the engine and exits on its own
//! once the aggregator is gone; the aggregator also aborts them on shutdown.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::coordinator::Engine;
use crate::errors::MarketDataError;
use crate::models::{ExchangeHealth, HealthStatus};

/// Receives health reports and exchange failures.
///
/// Implementations must be cheap; they are called from the request path
/// (`on_exchange_error`) and the monitor task (`on_health_report`).
pub trait HealthObserver: Send + Sync {
    /// Called after every periodic health sweep.
    fn on_health_report(&self, report: &HashMap<String, ExchangeHealth>);

    /// Called when an exchange call fails in a way that counts against it.
    fn on_exchange_error(&self, _exchange: &str, _error: &MarketDataError) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHealthObserver;

impl HealthObserver for LoggingHealthObserver {
    fn on_health_report(&self, report: &HashMap<String, ExchangeHealth>) {
        for (exchange, health) in report {
            match health.status {
                HealthStatus::Healthy => debug!(
                    "Exchange {} healthy ({:.0}ms avg, {:.1}% uptime)",
                    exchange, health.avg_response_time_ms, health.uptime_percent
                ),
                status => warn!(
                    "Exchange {} is {} ({} consecutive failures)",
                    exchange, status, health.consecutive_failures
                ),
            }
        }
    }

    fn on_exchange_error(&self, exchange: &str, error: &MarketDataError) {
        debug!("Exchange {} reported {}: {}", exchange, error.code(), error);
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Periodically health-checks every exchange and hands the report to the
/// observer.
pub(crate) fn spawn_health_monitor(engine: Weak<Engine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Health monitor started ({}s interval)", period.as_secs());
        let mut ticker = new_ticker(period);
        loop {
            ticker.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            let report = engine.exchange_health().await;
            engine.observer().on_health_report(&report);
        }
        debug!("Health monitor stopped");
    })
}

/// Periodically drops expired cache entries.
pub(crate) fn spawn_cache_sweeper(engine: Weak<Engine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Cache sweeper started ({}s interval)", period.as_secs());
        let mut ticker = new_ticker(period);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.sweep_cache().await;
        }
        debug!("Cache sweeper stopped");
    })
}

/// Polls one `(exchange, symbol)` stream and publishes every new point.
pub(crate) fn spawn_stream(
    engine: Weak<Engine>,
    exchange: String,
    symbol: String,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Stream {}:{} opened", exchange, symbol);
        let mut ticker = new_ticker(period);
        loop {
            ticker.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.poll_stream(&exchange, &symbol).await;
        }
        debug!("Stream {}:{} closed", exchange, symbol);
    })
}
