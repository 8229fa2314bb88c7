//! Subscription bookkeeping.
//!
//! Every subscription expands to a set of `(exchange, symbol)` streams.
//! Streams are shared between subscriptions and reference counted: the
//! first subscription that needs a stream opens it, the last one to leave
//! closes it. The registry only tracks state; spawning and aborting the
//! polling tasks is up to the caller.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use tokio::task::AbortHandle;

use crate::models::{Subscription, SubscriptionId, UpdateChannel};

/// `(exchange, symbol)` pair identifying one upstream stream.
pub type StreamKey = (String, String);

#[derive(Default)]
struct StreamEntry {
    refs: usize,
    task: Option<AbortHandle>,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    streams: HashMap<StreamKey, StreamEntry>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<State>,
}

fn stream_keys(subscription: &Subscription) -> BTreeSet<StreamKey> {
    subscription
        .exchanges
        .iter()
        .flat_map(|exchange| {
            subscription
                .symbols
                .iter()
                .map(move |symbol| (exchange.clone(), symbol.clone()))
        })
        .collect()
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Subscription registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a subscription. Returns the streams that were not open yet
    /// and now need a polling task.
    pub fn insert(&self, subscription: Subscription) -> Vec<StreamKey> {
        let mut state = self.lock_state();
        let mut opened = Vec::new();
        for key in stream_keys(&subscription) {
            let entry = state.streams.entry(key.clone()).or_default();
            entry.refs += 1;
            if entry.refs == 1 {
                opened.push(key);
            }
        }
        debug!(
            "Subscription {} registered ({} new streams)",
            subscription.id,
            opened.len()
        );
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
        opened
    }

    /// Attach the polling task of a stream opened by [`insert`](Self::insert).
    ///
    /// If every subscriber left while the task was being spawned the task is
    /// aborted right away.
    pub fn attach(&self, key: &StreamKey, task: AbortHandle) {
        let mut state = self.lock_state();
        match state.streams.get_mut(key) {
            Some(entry) => {
                if let Some(previous) = entry.task.replace(task) {
                    previous.abort();
                }
            }
            None => task.abort(),
        }
    }

    /// Remove a subscription. Unknown ids are a no-op.
    ///
    /// Returns the streams that lost their last subscriber; their tasks have
    /// already been aborted.
    pub fn remove(&self, id: &str) -> Vec<StreamKey> {
        let mut state = self.lock_state();
        let Some(subscription) = state.subscriptions.remove(id) else {
            debug!("Unsubscribe for unknown subscription {} ignored", id);
            return Vec::new();
        };
        release_streams(&mut state, &subscription)
    }

    /// Remove every subscription owned by `owner`, e.g. on disconnect.
    pub fn remove_owner(&self, owner: &str) -> (Vec<SubscriptionId>, Vec<StreamKey>) {
        let mut state = self.lock_state();
        let ids: Vec<SubscriptionId> = state
            .subscriptions
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| s.id.clone())
            .collect();

        let mut closed = Vec::new();
        for id in &ids {
            if let Some(subscription) = state.subscriptions.remove(id) {
                closed.extend(release_streams(&mut state, &subscription));
            }
        }
        (ids, closed)
    }

    /// Abort every stream and forget every subscription.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        for (_, entry) in state.streams.drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        state.subscriptions.clear();
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.lock_state().subscriptions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_state().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().subscriptions.is_empty()
    }

    /// Open streams, sorted.
    pub fn active_streams(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = self.lock_state().streams.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_streaming(&self, key: &StreamKey) -> bool {
        self.lock_state().streams.contains_key(key)
    }

    /// Union of the channels wanted by subscriptions covering the stream.
    /// Empty when nobody listens to it any more.
    pub fn channels_for(&self, exchange: &str, symbol: &str) -> Vec<UpdateChannel> {
        let mut channels: Vec<UpdateChannel> = self
            .lock_state()
            .subscriptions
            .values()
            .filter(|s| s.wants(exchange, symbol))
            .flat_map(|s| s.channels.iter().copied())
            .collect();
        channels.sort_by_key(|c| *c as u8);
        channels.dedup();
        channels
    }
}

fn release_streams(state: &mut State, subscription: &Subscription) -> Vec<StreamKey> {
    let mut closed = Vec::new();
    for key in stream_keys(subscription) {
        let last = match state.streams.get_mut(&key) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if last {
            if let Some(entry) = state.streams.remove(&key) {
                if let Some(task) = entry.task {
                    task.abort();
                }
            }
            closed.push(key);
        }
    }
    debug!(
        "Subscription {} removed ({} streams closed)",
        subscription.id,
        closed.len()
    );
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpdateChannel;
    use chrono::Utc;

    fn subscription(id: &str, owner: &str, symbols: &[&str], exchanges: &[&str]) -> Subscription {
        Subscription {
            id: id.to_string(),
            owner: owner.to_string(),
            channels: vec![UpdateChannel::Prices],
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            exchanges: exchanges.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn key(exchange: &str, symbol: &str) -> StreamKey {
        (exchange.to_string(), symbol.to_string())
    }

    #[test]
    fn test_streams_are_shared_and_refcounted() {
        let registry = SubscriptionRegistry::new();

        let opened = registry.insert(subscription("a", "c1", &["BTC", "ETH"], &["binance"]));
        assert_eq!(opened, vec![key("binance", "BTC"), key("binance", "ETH")]);

        let opened = registry.insert(subscription("b", "c2", &["BTC"], &["binance", "luno"]));
        assert_eq!(opened, vec![key("luno", "BTC")]);

        let closed = registry.remove("a");
        assert_eq!(closed, vec![key("binance", "ETH")]);
        assert!(registry.is_streaming(&key("binance", "BTC")));

        let closed = registry.remove("b");
        assert_eq!(closed.len(), 2);
        assert!(registry.active_streams().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_id_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        registry.insert(subscription("a", "c1", &["BTC"], &["binance"]));

        assert!(registry.remove("nope").is_empty());
        assert!(registry.remove("a").len() == 1);
        assert!(registry.remove("a").is_empty());
    }

    #[test]
    fn test_remove_owner_drops_only_that_owner() {
        let registry = SubscriptionRegistry::new();
        registry.insert(subscription("a", "c1", &["BTC"], &["binance"]));
        registry.insert(subscription("b", "c1", &["ETH"], &["binance"]));
        registry.insert(subscription("c", "c2", &["BTC"], &["binance"]));

        let (mut ids, closed) = registry.remove_owner("c1");
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(closed, vec![key("binance", "ETH")]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("c").is_some());
    }

    #[test]
    fn test_channels_are_merged_per_stream() {
        let registry = SubscriptionRegistry::new();
        registry.insert(subscription("a", "c1", &["BTC"], &["binance"]));
        let mut volume = subscription("b", "c2", &["BTC", "ETH"], &["binance", "luno"]);
        volume.channels = vec![UpdateChannel::Volume];
        registry.insert(volume);

        assert_eq!(
            registry.channels_for("binance", "BTC"),
            vec![UpdateChannel::Prices, UpdateChannel::Volume]
        );
        assert_eq!(registry.channels_for("luno", "ETH"), vec![UpdateChannel::Volume]);

        registry.remove("b");
        assert!(registry.channels_for("luno", "ETH").is_empty());
        assert_eq!(registry.channels_for("binance", "BTC"), vec![UpdateChannel::Prices]);
    }

    #[tokio::test]
    async fn test_attach_after_close_aborts_task() {
        let registry = SubscriptionRegistry::new();
        let opened = registry.insert(subscription("a", "c1", &["BTC"], &["binance"]));
        registry.remove("a");

        let task = tokio::spawn(std::future::pending::<()>());
        registry.attach(&opened[0], task.abort_handle());

        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
