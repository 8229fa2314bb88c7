use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use coinfeed_market_data::{AggregatorConfig, MarketDataAggregator, MemoryWarmStore, WarmStore};
use coinfeed_storage_sqlite::SqliteColdStore;

use crate::config::Config;

pub struct AppState {
    pub aggregator: Arc<MarketDataAggregator>,
    pub cold_store: Arc<SqliteColdStore>,
    pub config: Config,
}

pub fn init_tracing() {
    let log_format = std::env::var("COINFEED_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn load_engine_config(config: &Config) -> anyhow::Result<AggregatorConfig> {
    match &config.engine_config_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading engine config {}", path.display()))?;
            let engine = AggregatorConfig::from_json(&json)
                .with_context(|| format!("parsing engine config {}", path.display()))?;
            tracing::info!("Engine config loaded from {}", path.display());
            Ok(engine)
        }
        None => {
            tracing::info!("No COINFEED_CONFIG set, using built-in engine defaults");
            Ok(AggregatorConfig::default())
        }
    }
}

#[cfg(feature = "redis")]
async fn build_warm_store(config: &Config) -> anyhow::Result<Arc<dyn WarmStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = coinfeed_market_data::RedisWarmStore::connect(url, "coinfeed:")
                .await
                .context("connecting to Redis warm store")?;
            tracing::info!("Warm tier: Redis");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryWarmStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_warm_store(config: &Config) -> anyhow::Result<Arc<dyn WarmStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("COINFEED_REDIS_URL is set but this build has no redis feature; using memory");
    }
    Ok(Arc::new(MemoryWarmStore::new()))
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let engine_config = load_engine_config(config)?;

    let cold_store = Arc::new(
        SqliteColdStore::open(&config.db_path)
            .with_context(|| format!("opening cold store at {}", config.db_path))?,
    );
    tracing::info!("Database path in use: {}", config.db_path);

    let warm_store = build_warm_store(config).await?;

    let aggregator = MarketDataAggregator::builder(engine_config)
        .warm_store(warm_store)
        .cold_store(cold_store.clone())
        .build()
        .context("building market data aggregator")?;
    tracing::info!(
        "Aggregator ready with exchanges: {}",
        aggregator.exchanges().join(", ")
    );

    Ok(Arc::new(AppState {
        aggregator: Arc::new(aggregator),
        cold_store,
        config: config.clone(),
    }))
}
