mod config;
mod main_lib;
mod scheduler;

use config::Config;
use main_lib::{build_state, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    init_tracing();
    let state = build_state(&config).await?;

    let poller = scheduler::start_quote_poll_scheduler(state.clone());
    let retention = scheduler::start_retention_scheduler(state.clone());

    tracing::info!("Coinfeed running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    poller.abort();
    retention.abort();
    state.aggregator.shutdown();
    Ok(())
}
