use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use coinfeed_market_data::models::{HistoryQuery, Provenance, QualityTier, QuotePoint, Transport};
use coinfeed_market_data::ColdStore;
use coinfeed_storage_sqlite::SqliteColdStore;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn point(symbol: &str, exchange: &str, price: Decimal, observed_at: DateTime<Utc>) -> QuotePoint {
    QuotePoint {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        price_usd: price,
        price_change_24h: dec!(-120.5),
        price_change_percent_24h: dec!(-0.18),
        volume_24h: dec!(15234.123456),
        volume_change_24h: None,
        high_24h: Some(price + dec!(100)),
        low_24h: Some(price - dec!(100)),
        market_cap: None,
        bid: Some(price - dec!(0.5)),
        ask: Some(price + dec!(0.5)),
        spread_percent: Some(dec!(0.0015)),
        observed_at,
        provenance: Provenance {
            endpoint: "/api/v3/ticker/24hr".to_string(),
            transport: Transport::Rest,
            reliability: 0.95,
            latency_ms: 42,
        },
        quality: QualityTier::High,
    }
}

fn open_store(dir: &TempDir) -> SqliteColdStore {
    let path = dir.path().join("data").join("coinfeed.db");
    SqliteColdStore::open(path.to_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_persisted_points_read_back_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let original = point("BTC", "binance", dec!(67250.12345678), base_time());

    assert_eq!(store.persist(&[original.clone()]).await.unwrap(), 1);

    let found = store
        .latest_since(&["BTC".to_string()], base_time() - Duration::minutes(5), 10)
        .await
        .unwrap();
    assert_eq!(found, vec![original]);
}

#[tokio::test]
async fn test_same_key_is_replaced() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .persist(&[point("ETH", "luno", dec!(3100), base_time())])
        .await
        .unwrap();
    let newer = point("ETH", "luno", dec!(3105), base_time()).with_quality(QualityTier::Medium);
    store.persist(&[newer.clone()]).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let found = store
        .latest_since(&["ETH".to_string()], base_time(), 10)
        .await
        .unwrap();
    assert_eq!(found, vec![newer]);
}

#[tokio::test]
async fn test_latest_since_filters_and_orders_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let t = base_time();

    store
        .persist(&[
            point("BTC", "binance", dec!(67000), t - Duration::minutes(30)),
            point("BTC", "binance", dec!(67100), t - Duration::minutes(2)),
            point("BTC", "luno", dec!(67090), t - Duration::minutes(1)),
            point("SOL", "binance", dec!(150), t),
        ])
        .await
        .unwrap();

    let found = store
        .latest_since(&["BTC".to_string()], t - Duration::minutes(5), 10)
        .await
        .unwrap();
    let seen: Vec<(&str, Decimal)> = found
        .iter()
        .map(|p| (p.exchange.as_str(), p.price_usd))
        .collect();
    assert_eq!(seen, vec![("luno", dec!(67090)), ("binance", dec!(67100))]);

    let limited = store
        .latest_since(&["BTC".to_string(), "SOL".to_string()], t - Duration::hours(1), 2)
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].symbol, "SOL");

    assert!(store
        .latest_since(&[], t - Duration::hours(1), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_range_respects_window_and_exchange_filter() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let t = base_time();

    store
        .persist(&[
            point("BTC", "binance", dec!(66000), t - Duration::hours(3)),
            point("BTC", "binance", dec!(66500), t - Duration::hours(1)),
            point("BTC", "luno", dec!(66400), t - Duration::hours(1)),
            point("BTC", "binance", dec!(67000), t + Duration::hours(1)),
        ])
        .await
        .unwrap();

    let mut query = HistoryQuery {
        symbol: "BTC".to_string(),
        exchanges: Vec::new(),
        from: t - Duration::hours(2),
        to: t,
        limit: 100,
    };
    assert_eq!(store.range(&query).await.unwrap().len(), 2);

    query.exchanges = vec!["luno".to_string()];
    let luno = store.range(&query).await.unwrap();
    assert_eq!(luno.len(), 1);
    assert_eq!(luno[0].price_usd, dec!(66400));

    query.exchanges = Vec::new();
    query.from = t - Duration::hours(4);
    query.limit = 1;
    let newest = store.range(&query).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].observed_at, t - Duration::hours(1));
}

#[tokio::test]
async fn test_prune_before_removes_old_records() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let t = base_time();

    store
        .persist(&[
            point("BTC", "binance", dec!(60000), t - Duration::days(10)),
            point("BTC", "binance", dec!(61000), t - Duration::days(8)),
            point("BTC", "binance", dec!(67000), t),
        ])
        .await
        .unwrap();

    assert_eq!(store.prune_before(t - Duration::days(7)).await.unwrap(), 2);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(store.prune_before(t - Duration::days(7)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reopening_keeps_records() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        store
            .persist(&[point("ADA", "binance", dec!(0.45), base_time())])
            .await
            .unwrap();
    }

    let reopened = open_store(&dir);
    assert_eq!(reopened.count().await.unwrap(), 1);
}
