//! The aggregation coordinator.
//!
//! [`MarketDataAggregator`] owns every piece of shared state: adapters,
//! circuit breakers, the tiered cache, the latest-quote book used for
//! cross-exchange validation, subscriptions and background tasks. Nothing
//! is process-global, so several aggregators can live side by side.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::history;
use super::monitor::{self, HealthObserver, LoggingHealthObserver};
use super::subscriptions::{StreamKey, SubscriptionRegistry};
use crate::cache::key::{canonical_symbols, historical_key, market_data_key};
use crate::cache::{CacheStats, ColdStore, MemoryColdStore, MemoryWarmStore, TieredCache, WarmStore};
use crate::config::AggregatorConfig;
use crate::errors::MarketDataError;
use crate::exchange::{build_adapter, ExchangeAdapter};
use crate::models::{
    canonical_symbol, AggregatedQuote, CacheInfo, CacheTier, DataOrigin, ExchangeHealth,
    HistoricalOptions, HistoricalPoint, OrderBookTop, PerformanceInfo, QualityTier,
    QueryOptions, QuotePoint, SortField, SortOrder, Subscription, SubscriptionId,
    SubscriptionRequest, Symbol, TradingPair, Transport, UpdateChannel, UpdateEvent,
};
use crate::registry::{CircuitBreaker, CircuitSnapshot, DataQualityValidator, RateLimiter};

/// Per-call deadline for adapters without an exchange configuration.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered update events per receiver before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

type BookKey = (Symbol, String);

/// Outcome of one fan-out round.
struct FanOut {
    points: Vec<QuotePoint>,
    succeeded: usize,
    penalized: usize,
    skipped: usize,
    /// Last failure that was the caller's fault (unknown symbol, ...)
    rejected: Option<MarketDataError>,
}

/// Shared state behind the aggregator; background tasks hold it weakly.
pub(crate) struct Engine {
    config: AggregatorConfig,
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    call_timeouts: HashMap<String, Duration>,
    breaker: CircuitBreaker,
    cache: TieredCache,
    validator: DataQualityValidator,
    book: Mutex<HashMap<BookKey, QuotePoint>>,
    subscriptions: SubscriptionRegistry,
    updates: broadcast::Sender<UpdateEvent>,
    observer: Arc<dyn HealthObserver>,
}

/// Builder for [`MarketDataAggregator`].
pub struct AggregatorBuilder {
    config: AggregatorConfig,
    warm: Option<Arc<dyn WarmStore>>,
    cold: Option<Arc<dyn ColdStore>>,
    observer: Option<Arc<dyn HealthObserver>>,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    background_tasks: bool,
}

impl AggregatorBuilder {
    fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            warm: None,
            cold: None,
            observer: None,
            adapters: Vec::new(),
            background_tasks: true,
        }
    }

    /// Warm tier shared between instances. Defaults to an in-process map.
    pub fn warm_store(mut self, store: Arc<dyn WarmStore>) -> Self {
        self.warm = Some(store);
        self
    }

    /// Durable history. Defaults to an in-memory store.
    pub fn cold_store(mut self, store: Arc<dyn ColdStore>) -> Self {
        self.cold = Some(store);
        self
    }

    pub fn health_observer(mut self, observer: Arc<dyn HealthObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use `adapter` instead of building one from configuration. An
    /// exchange configuration with the same id still supplies its breaker
    /// thresholds and call timeout.
    pub fn adapter(mut self, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Don't start the health monitor and cache sweeper on build.
    pub fn without_background_tasks(mut self) -> Self {
        self.background_tasks = false;
        self
    }

    /// Build the aggregator.
    ///
    /// Background tasks are started right away when called inside a Tokio
    /// runtime; otherwise call [`MarketDataAggregator::start`] later.
    pub fn build(self) -> Result<MarketDataAggregator, MarketDataError> {
        self.config.validate()?;

        let rate_limiter = Arc::new(RateLimiter::new());
        let breaker = CircuitBreaker::new();
        let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = self
            .adapters
            .into_iter()
            .map(|adapter| (adapter.id().to_string(), adapter))
            .collect();
        let mut call_timeouts = HashMap::new();

        for exchange in self.config.enabled_exchanges() {
            breaker.register(&exchange.id, (&exchange.circuit_breaker).into());
            call_timeouts.insert(exchange.id.clone(), exchange.timeout());
            if !adapters.contains_key(&exchange.id) {
                let adapter = build_adapter(
                    exchange,
                    rate_limiter.clone(),
                    self.config.monitoring.unhealthy_failure_threshold,
                )?;
                adapters.insert(exchange.id.clone(), adapter);
            }
        }

        let warm = self
            .warm
            .unwrap_or_else(|| Arc::new(MemoryWarmStore::new()));
        let cold = self
            .cold
            .unwrap_or_else(|| Arc::new(MemoryColdStore::new()));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let engine = Engine {
            cache: TieredCache::new(&self.config.caching, warm, cold),
            validator: DataQualityValidator::with_config(self.config.validation.clone()),
            config: self.config,
            adapters,
            call_timeouts,
            breaker,
            book: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            updates,
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(LoggingHealthObserver)),
        };

        let mut exchanges: Vec<&str> = engine.adapters.keys().map(String::as_str).collect();
        exchanges.sort_unstable();
        info!("Market data aggregator ready: exchanges [{}]", exchanges.join(", "));

        let aggregator = MarketDataAggregator {
            engine: Arc::new(engine),
            tasks: Mutex::new(Vec::new()),
        };
        if self.background_tasks && tokio::runtime::Handle::try_current().is_ok() {
            aggregator.start();
        }
        Ok(aggregator)
    }
}

/// Market data aggregation engine.
///
/// Reads go hot cache, warm cache, then a concurrent fan-out to every
/// eligible exchange. When every exchange fails, recent cold-store records
/// are served as a FALLBACK result.
pub struct MarketDataAggregator {
    engine: Arc<Engine>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MarketDataAggregator {
    pub fn builder(config: AggregatorConfig) -> AggregatorBuilder {
        AggregatorBuilder::new(config)
    }

    /// Aggregator with exchange adapters built from `config` and in-memory
    /// warm and cold tiers.
    pub fn new(config: AggregatorConfig) -> Result<Self, MarketDataError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.engine.config
    }

    /// Configured exchange ids, sorted.
    pub fn exchanges(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engine.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Latest quotes for `symbols`.
    ///
    /// Fails with `INVALID_SYMBOL` for an empty symbol list or more symbols
    /// than `performance.max_symbols_per_request`, and with
    /// `EXCHANGE_UNAVAILABLE` when no exchange answered and no recent
    /// fallback exists.
    pub async fn get_market_data<S: AsRef<str>>(
        &self,
        symbols: &[S],
        options: &QueryOptions,
    ) -> Result<AggregatedQuote, MarketDataError> {
        self.engine.market_data(symbols, options).await
    }

    /// OHLC candles for `symbol` from the cold store.
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        interval: crate::models::TimeInterval,
        options: &HistoricalOptions,
    ) -> Result<Vec<HistoricalPoint>, MarketDataError> {
        self.engine.historical(symbol, interval, options).await
    }

    /// Health of every exchange. A failing or slow check yields an
    /// UNHEALTHY entry for that exchange only.
    pub async fn get_exchange_health(&self) -> HashMap<String, ExchangeHealth> {
        self.engine.exchange_health().await
    }

    /// Quality tier `point` would get against the latest known quotes.
    pub fn validate_data(&self, point: &QuotePoint) -> QualityTier {
        self.engine.validate_point(point)
    }

    /// Active trading pairs listed by one exchange.
    pub async fn get_trading_pairs(&self, exchange: &str) -> Result<Vec<TradingPair>, MarketDataError> {
        let adapter = self.engine.adapter(exchange)?;
        self.engine
            .guarded(adapter.id(), adapter.fetch_trading_pairs())
            .await
    }

    /// Best bid and ask for `symbol` on one exchange.
    pub async fn get_order_book_top(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<OrderBookTop, MarketDataError> {
        let adapter = self.engine.adapter(exchange)?;
        let symbol = canonical_symbol(symbol);
        self.engine
            .guarded(adapter.id(), adapter.fetch_order_book_top(&symbol))
            .await
    }

    /// Register a subscription and open any stream it needs.
    ///
    /// Empty `exchanges` means every configured exchange; empty `channels`
    /// means prices only.
    pub async fn subscribe_to_updates(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionId, MarketDataError> {
        let subscription = self.engine.new_subscription(request)?;
        let id = subscription.id.clone();
        let period = Duration::from_millis(self.engine.config.monitoring.stream_poll_interval_ms);

        let opened = self.engine.subscriptions.insert(subscription);
        for key in opened {
            let (exchange, symbol) = key.clone();
            let task = monitor::spawn_stream(Arc::downgrade(&self.engine), exchange, symbol, period);
            self.engine.subscriptions.attach(&key, task.abort_handle());
        }
        info!("Subscription {} created", id);
        Ok(id)
    }

    /// Remove a subscription. Unknown or already removed ids are a no-op.
    pub fn unsubscribe_from_updates(&self, id: &str) {
        let closed = self.engine.subscriptions.remove(id);
        if !closed.is_empty() {
            debug!("Closed {} streams for subscription {}", closed.len(), id);
        }
    }

    /// Remove every subscription of `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let (ids, closed) = self.engine.subscriptions.remove_owner(owner);
        if !ids.is_empty() {
            info!(
                "Owner {} disconnected: {} subscriptions, {} streams closed",
                owner,
                ids.len(),
                closed.len()
            );
        }
        ids.len()
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.engine.subscriptions.get(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.engine.subscriptions.len()
    }

    /// Open `(exchange, symbol)` streams, sorted.
    pub fn active_streams(&self) -> Vec<StreamKey> {
        self.engine.subscriptions.active_streams()
    }

    /// Receiver of every update event produced by subscription streams.
    pub fn updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.engine.updates.subscribe()
    }

    pub fn circuit_states(&self) -> Vec<CircuitSnapshot> {
        self.engine.breaker.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache.stats()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("Aggregator task list mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Start the health monitor and cache sweeper. Calling it again while
    /// they run does nothing. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.lock_tasks();
        if !tasks.is_empty() {
            return;
        }
        let monitoring = &self.engine.config.monitoring;
        tasks.push(monitor::spawn_health_monitor(
            Arc::downgrade(&self.engine),
            Duration::from_secs(monitoring.health_check_interval_secs),
        ));
        tasks.push(monitor::spawn_cache_sweeper(
            Arc::downgrade(&self.engine),
            Duration::from_secs(monitoring.cache_cleanup_interval_secs),
        ));
    }

    /// Stop background tasks and close every subscription stream.
    pub fn shutdown(&self) {
        let mut tasks = self.lock_tasks();
        for task in tasks.drain(..) {
            task.abort();
        }
        self.engine.subscriptions.clear();
        info!("Market data aggregator stopped");
    }
}

impl Drop for MarketDataAggregator {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.engine.subscriptions.clear();
    }
}

impl Engine {
    pub(crate) fn observer(&self) -> &Arc<dyn HealthObserver> {
        &self.observer
    }

    fn adapter(&self, exchange: &str) -> Result<Arc<dyn ExchangeAdapter>, MarketDataError> {
        self.adapters
            .get(&exchange.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| {
                MarketDataError::InvalidRequest(format!("unknown exchange '{}'", exchange))
            })
    }

    fn call_timeout(&self, exchange: &str) -> Duration {
        self.call_timeouts
            .get(exchange)
            .copied()
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }

    fn lock_book(&self) -> MutexGuard<'_, HashMap<BookKey, QuotePoint>> {
        self.book.lock().unwrap_or_else(|poisoned| {
            warn!("Quote book mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Keep the newest point per (symbol, exchange).
    fn remember(&self, points: &[QuotePoint]) {
        let mut book = self.lock_book();
        for point in points {
            let key = (point.symbol.clone(), point.exchange.clone());
            match book.get(&key) {
                Some(known) if known.observed_at > point.observed_at => {}
                _ => {
                    book.insert(key, point.clone());
                }
            }
        }
    }

    fn book_snapshot(&self, symbols: &[Symbol]) -> Vec<QuotePoint> {
        self.lock_book()
            .values()
            .filter(|p| symbols.contains(&p.symbol))
            .cloned()
            .collect()
    }

    /// Run one exchange call under its breaker and deadline.
    ///
    /// The breaker must already have allowed the call. Failures that are the
    /// exchange's fault count against it; caller errors only release a
    /// half-open probe.
    async fn guarded<T, F>(&self, exchange: &str, call: F) -> Result<T, MarketDataError>
    where
        F: std::future::Future<Output = Result<T, MarketDataError>>,
    {
        if !self.breaker.is_allowed(exchange) {
            return Err(MarketDataError::CircuitOpen {
                exchange: exchange.to_string(),
            });
        }
        self.settle(exchange, call).await
    }

    async fn settle<T, F>(&self, exchange: &str, call: F) -> Result<T, MarketDataError>
    where
        F: std::future::Future<Output = Result<T, MarketDataError>>,
    {
        let result = match timeout(self.call_timeout(exchange), call).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                exchange: exchange.to_string(),
            }),
        };

        match &result {
            Ok(_) => self.breaker.record_success(exchange),
            Err(e) if e.penalizes_exchange() => {
                warn!("Exchange {} failed: {}", exchange, e);
                self.breaker.record_failure(exchange);
                self.observer.on_exchange_error(exchange, e);
            }
            Err(e) => {
                debug!("Exchange {} rejected request: {}", exchange, e);
                self.breaker.release_probe(exchange);
            }
        }
        result
    }

    /// Adapters a request may use, by priority then id.
    fn eligible_adapters(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<Arc<dyn ExchangeAdapter>>, MarketDataError> {
        let mut selected: Vec<Arc<dyn ExchangeAdapter>> = match &options.exchanges {
            None => self.adapters.values().cloned().collect(),
            Some(requested) => {
                let wanted: HashSet<String> =
                    requested.iter().map(|e| e.trim().to_lowercase()).collect();
                let selected: Vec<_> = self
                    .adapters
                    .iter()
                    .filter(|(id, _)| wanted.contains(id.as_str()))
                    .map(|(_, adapter)| adapter.clone())
                    .collect();
                if selected.is_empty() {
                    return Err(MarketDataError::InvalidRequest(format!(
                        "none of the requested exchanges are configured: {}",
                        requested.join(", ")
                    )));
                }
                selected
            }
        };
        selected.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(selected)
    }

    async fn fan_out(&self, symbols: &[Symbol], adapters: &[Arc<dyn ExchangeAdapter>]) -> FanOut {
        let mut skipped = 0;
        let mut calls = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            if !self.breaker.is_allowed(adapter.id()) {
                debug!("Skipping {}: circuit open", adapter.id());
                skipped += 1;
                continue;
            }
            calls.push(async move { self.settle(adapter.id(), adapter.fetch_quotes(symbols)).await });
        }

        let mut outcome = FanOut {
            points: Vec::new(),
            succeeded: 0,
            penalized: 0,
            skipped,
            rejected: None,
        };
        for result in join_all(calls).await {
            match result {
                Ok(points) => {
                    outcome.succeeded += 1;
                    outcome.points.extend(points);
                }
                Err(e) if e.penalizes_exchange() => outcome.penalized += 1,
                Err(e) => outcome.rejected = Some(e),
            }
        }
        outcome
    }

    async fn market_data<S: AsRef<str>>(
        &self,
        symbols: &[S],
        options: &QueryOptions,
    ) -> Result<AggregatedQuote, MarketDataError> {
        let started = Instant::now();
        let symbols = canonical_symbols(symbols);
        if symbols.is_empty() {
            return Err(MarketDataError::InvalidSymbol(
                "at least one symbol is required".to_string(),
            ));
        }
        let max_symbols = self.config.performance.max_symbols_per_request;
        if symbols.len() > max_symbols {
            return Err(MarketDataError::InvalidRequest(format!(
                "{} symbols requested, at most {} allowed",
                symbols.len(),
                max_symbols
            )));
        }
        let adapters = self.eligible_adapters(options)?;
        let key = market_data_key(&symbols, options);

        let mut performance = PerformanceInfo::default();
        let cached = if options.force_refresh {
            None
        } else {
            self.cache.lookup(&key).await
        };

        let mut response = match cached {
            Some((points, tier)) => {
                performance.cache_hits = 1;
                let (origin, ttl) = match tier {
                    CacheTier::Warm => {
                        performance.cache_misses = 1;
                        (DataOrigin::Warm, self.cache.warm_ttl())
                    }
                    _ => (DataOrigin::Memory, self.cache.hot_ttl()),
                };
                AggregatedQuote::new(
                    points.as_ref().clone(),
                    origin,
                    CacheInfo {
                        hit: true,
                        ttl_secs: ttl.as_secs(),
                        tier: Some(tier),
                    },
                    performance,
                )
            }
            None => {
                if !options.force_refresh {
                    performance.cache_misses = 2;
                }
                self.fetch_live(&key, &symbols, options, &adapters, performance)
                    .await?
            }
        };

        let elapsed = started.elapsed();
        response.performance.elapsed_ms = elapsed.as_millis() as u64;
        let budget = self.config.performance.max_response_time_ms;
        if response.performance.elapsed_ms > budget {
            warn!(
                "get_market_data took {}ms for {} symbols (budget {}ms)",
                response.performance.elapsed_ms,
                symbols.len(),
                budget
            );
        }
        Ok(response)
    }

    async fn fetch_live(
        &self,
        key: &str,
        symbols: &[Symbol],
        options: &QueryOptions,
        adapters: &[Arc<dyn ExchangeAdapter>],
        performance: PerformanceInfo,
    ) -> Result<AggregatedQuote, MarketDataError> {
        let outcome = self.fan_out(symbols, adapters).await;
        if outcome.succeeded == 0 {
            warn!(
                "No exchange answered for [{}] ({} failed, {} skipped)",
                symbols.join(","),
                outcome.penalized,
                outcome.skipped
            );
            if let Some(rejected) = &outcome.rejected {
                debug!("Last rejection for [{}]: {}", symbols.join(","), rejected);
            }
            let failure = MarketDataError::AllExchangesFailed {
                symbols: symbols.join(","),
            };
            return self.fallback(symbols, options, performance, failure).await;
        }

        let reference = self.book_snapshot(symbols);
        let validated = self.validator.validate_batch(outcome.points, &reference);
        self.remember(&validated);

        let passing: Vec<QuotePoint> = validated
            .iter()
            .filter(|p| p.quality.is_fresh_cacheable())
            .cloned()
            .collect();
        self.cache.persist(&passing).await;
        let cacheable = !validated.is_empty() && passing.len() == validated.len();

        let data = present(validated, options);
        let ttl_secs = if cacheable {
            self.cache.store_fresh(key, Arc::new(data.clone())).await;
            self.cache.hot_ttl().as_secs()
        } else {
            0
        };

        Ok(AggregatedQuote::new(
            data,
            DataOrigin::Live,
            CacheInfo {
                hit: false,
                ttl_secs,
                tier: None,
            },
            performance,
        ))
    }

    /// Serve the newest cold record per (symbol, exchange) inside the
    /// fallback window, or `failure` when there is none.
    async fn fallback(
        &self,
        symbols: &[Symbol],
        options: &QueryOptions,
        mut performance: PerformanceInfo,
        failure: MarketDataError,
    ) -> Result<AggregatedQuote, MarketDataError> {
        let since = Utc::now() - chrono::Duration::seconds(self.config.history.fallback_window_secs);
        performance.store_queries += 1;

        let rows = match self
            .cache
            .cold()
            .latest_since(symbols, since, self.config.history.fallback_limit)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Fallback lookup failed: {}", e);
                Vec::new()
            }
        };

        let now = Utc::now();
        let mut seen = HashSet::new();
        let data: Vec<QuotePoint> = rows
            .into_iter()
            .filter(|p| seen.insert((p.symbol.clone(), p.exchange.clone())))
            .map(|p| self.restamp_stored(p, now))
            .collect();

        if data.is_empty() {
            return Err(failure);
        }
        warn!(
            "Serving {} fallback points for [{}]",
            data.len(),
            symbols.join(",")
        );
        Ok(AggregatedQuote::new(
            present(data, options),
            DataOrigin::Fallback,
            CacheInfo {
                hit: false,
                ttl_secs: 0,
                tier: Some(CacheTier::Cold),
            },
            performance,
        ))
    }

    /// Re-grade a cold record for serving: it is at best MEDIUM, and the
    /// staleness and sanity checks run again against `now`.
    fn restamp_stored(&self, mut point: QuotePoint, now: chrono::DateTime<Utc>) -> QuotePoint {
        point.provenance.transport = Transport::Store;
        point.quality = point.quality.downgrade(QualityTier::Medium);
        let tier = self.validator.assess(&point, &[], now).tier;
        point.with_quality(tier)
    }

    async fn historical(
        &self,
        symbol: &str,
        interval: crate::models::TimeInterval,
        options: &HistoricalOptions,
    ) -> Result<Vec<HistoricalPoint>, MarketDataError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(MarketDataError::InvalidSymbol(
                "a symbol is required".to_string(),
            ));
        }

        let key = historical_key(&symbol, interval, options);
        if let Some(candles) = self.cache.warm_get::<Vec<HistoricalPoint>>(&key).await {
            return Ok(candles);
        }

        let query = history::resolve_query(&symbol, options, &self.config.history, Utc::now())?;
        let points = self.cache.cold().range(&query).await?;
        let candles = history::bucket_candles(
            &points,
            options.granularity.unwrap_or(interval),
            options.include_volume,
        );
        debug!(
            "History {} {}: {} rows -> {} candles",
            symbol,
            interval,
            points.len(),
            candles.len()
        );

        if !candles.is_empty() {
            let ttl = Duration::from_secs(self.config.history.historical_ttl_secs);
            self.cache.warm_set(&key, &candles, ttl).await;
        }
        Ok(candles)
    }

    pub(crate) async fn exchange_health(&self) -> HashMap<String, ExchangeHealth> {
        let limit = Duration::from_millis(self.config.monitoring.health_check_timeout_ms);
        let checks = self.adapters.iter().map(|(id, adapter)| async move {
            let health = match timeout(limit, adapter.health_check()).await {
                Ok(Ok(health)) => health,
                Ok(Err(e)) => {
                    warn!("Health check for {} failed: {}", id, e);
                    ExchangeHealth::unhealthy(self.breaker.failure_count(id))
                }
                Err(_) => {
                    warn!("Health check for {} timed out after {:?}", id, limit);
                    ExchangeHealth::unhealthy(self.breaker.failure_count(id))
                }
            };
            (id.clone(), health)
        });
        join_all(checks).await.into_iter().collect()
    }

    fn validate_point(&self, point: &QuotePoint) -> QualityTier {
        let symbol = canonical_symbol(&point.symbol);
        let peers: Vec<QuotePoint> = self
            .lock_book()
            .values()
            .filter(|p| p.symbol == symbol && p.exchange != point.exchange)
            .cloned()
            .collect();
        let peers: Vec<&QuotePoint> = peers.iter().collect();
        self.validator.assess(point, &peers, Utc::now()).tier
    }

    pub(crate) async fn sweep_cache(&self) {
        self.cache.sweep().await;
    }

    /// One poll of a subscription stream.
    pub(crate) async fn poll_stream(&self, exchange: &str, symbol: &str) {
        let Some(adapter) = self.adapters.get(exchange).cloned() else {
            return;
        };
        let channels = self.subscriptions.channels_for(exchange, symbol);
        if channels.is_empty() {
            debug!("Stream {}:{} has no listeners, skipping poll", exchange, symbol);
            return;
        }
        let symbols = vec![symbol.to_string()];
        let points = match self.guarded(exchange, adapter.fetch_quotes(&symbols)).await {
            Ok(points) => points,
            Err(MarketDataError::CircuitOpen { .. }) => {
                debug!("Stream {}:{} paused, circuit open", exchange, symbol);
                return;
            }
            Err(_) => return,
        };

        let reference = self.book_snapshot(&symbols);
        let validated = self.validator.validate_batch(points, &reference);
        self.remember(&validated);
        let passing: Vec<QuotePoint> = validated
            .iter()
            .filter(|p| p.quality.is_fresh_cacheable())
            .cloned()
            .collect();
        self.cache.persist(&passing).await;

        for point in validated {
            let event = UpdateEvent {
                exchange: point.exchange.clone(),
                symbol: point.symbol.clone(),
                channels: channels.clone(),
                point,
            };
            // No receivers is fine; events are not buffered for late joiners.
            let _ = self.updates.send(event);
        }
    }

    fn new_subscription(&self, request: SubscriptionRequest) -> Result<Subscription, MarketDataError> {
        let owner = request.owner.trim().to_string();
        if owner.is_empty() {
            return Err(MarketDataError::InvalidRequest(
                "subscription owner must not be empty".to_string(),
            ));
        }

        let symbols = canonical_symbols(&request.symbols);
        if symbols.is_empty() {
            return Err(MarketDataError::InvalidSymbol(
                "at least one symbol is required".to_string(),
            ));
        }
        let max_symbols = self.config.performance.max_symbols_per_request;
        if symbols.len() > max_symbols {
            return Err(MarketDataError::InvalidRequest(format!(
                "{} symbols requested, at most {} allowed",
                symbols.len(),
                max_symbols
            )));
        }

        let mut exchanges: Vec<String> = if request.exchanges.is_empty() {
            self.adapters.keys().cloned().collect()
        } else {
            request
                .exchanges
                .iter()
                .map(|e| e.trim().to_lowercase())
                .collect()
        };
        exchanges.sort();
        exchanges.dedup();
        if let Some(unknown) = exchanges.iter().find(|e| !self.adapters.contains_key(*e)) {
            return Err(MarketDataError::InvalidRequest(format!(
                "unknown exchange '{}'",
                unknown
            )));
        }

        let mut channels = request.channels;
        if channels.is_empty() {
            channels.push(UpdateChannel::Prices);
        }
        channels.sort_by_key(|c| *c as u8);
        channels.dedup();

        Ok(Subscription {
            id: format!("sub_{}", Uuid::new_v4().simple()),
            owner,
            channels,
            symbols,
            exchanges,
            created_at: Utc::now(),
        })
    }
}

/// Apply sorting and pagination from `options`.
///
/// Without a sort field points are ordered by symbol, then exchange.
fn present(mut points: Vec<QuotePoint>, options: &QueryOptions) -> Vec<QuotePoint> {
    match options.sort_by {
        Some(field) => points.sort_by(|a, b| {
            let ordering = match field {
                SortField::Symbol => a.symbol.cmp(&b.symbol),
                SortField::Price => a.price_usd.cmp(&b.price_usd),
                SortField::Volume => a.volume_24h.cmp(&b.volume_24h),
                SortField::Change => a.price_change_percent_24h.cmp(&b.price_change_percent_24h),
            }
            .then_with(|| a.exchange.cmp(&b.exchange));
            match options.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        }),
        None => points.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.exchange.cmp(&b.exchange))
        }),
    }

    let page = points.into_iter().skip(options.offset.unwrap_or(0));
    match options.limit {
        Some(limit) => page.take(limit).collect(),
        None => page.collect(),
    }
}
