//! Background schedulers for the daemon.
//!
//! The quote poll keeps the configured symbols fresh in every tier and feeds
//! the cold store with history. The retention job prunes old cold records.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use coinfeed_market_data::QueryOptions;

use crate::main_lib::AppState;

/// Retention runs once a day.
const RETENTION_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Initial delay before the first prune, so startup polls go first.
const RETENTION_INITIAL_DELAY_SECS: u64 = 60;

/// Starts the periodic quote poll. The first poll runs immediately.
pub fn start_quote_poll_scheduler(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = state.config.poll_interval;
        info!(
            "Quote poll scheduler started ({}s interval, {} symbols)",
            period.as_secs(),
            state.config.symbols.len()
        );

        let mut poll_interval = interval(period);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll_interval.tick().await;
            run_quote_poll(&state).await;
        }
    })
}

/// Runs a single poll across every configured exchange.
async fn run_quote_poll(state: &Arc<AppState>) {
    if state.config.symbols.is_empty() {
        debug!("Quote poll skipped: no symbols configured");
        return;
    }

    let options = QueryOptions {
        force_refresh: true,
        ..Default::default()
    };
    match state
        .aggregator
        .get_market_data(state.config.symbols.as_slice(), &options)
        .await
    {
        Ok(quote) => {
            info!(
                "Quote poll completed: {} points, origin {:?}, {}ms",
                quote.metadata.total, quote.metadata.origin, quote.performance.elapsed_ms
            );
        }
        Err(e) => warn!("Quote poll failed: {}", e),
    }
}

/// Starts the daily cold-store retention job.
pub fn start_retention_scheduler(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Retention scheduler started (keeping {} days)",
            state.config.retention_days
        );

        tokio::time::sleep(Duration::from_secs(RETENTION_INITIAL_DELAY_SECS)).await;

        let mut retention_interval = interval(Duration::from_secs(RETENTION_INTERVAL_SECS));
        loop {
            retention_interval.tick().await;
            run_retention(&state).await;
        }
    })
}

async fn run_retention(state: &Arc<AppState>) {
    let cutoff = Utc::now() - chrono::Duration::days(state.config.retention_days);
    match state.cold_store.prune_before(cutoff).await {
        Ok(0) => debug!("Retention: nothing older than {}", cutoff),
        Ok(removed) => info!("Retention: pruned {} cold records older than {}", removed, cutoff),
        Err(e) => warn!("Retention prune failed: {}", e),
    }
}
