use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quote::QuotePoint;
use super::types::{Symbol, SubscriptionId};

/// Kind of update a subscriber wants.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateChannel {
    Prices,
    Volume,
}

/// What a caller asks for when subscribing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Connection or client that owns the subscription
    pub owner: String,
    pub channels: Vec<UpdateChannel>,
    pub symbols: Vec<Symbol>,
    pub exchanges: Vec<String>,
}

/// A live subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: String,
    pub channels: Vec<UpdateChannel>,
    pub symbols: Vec<Symbol>,
    pub exchanges: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether an update for `(exchange, symbol)` is relevant to this subscription.
    pub fn wants(&self, exchange: &str, symbol: &str) -> bool {
        self.exchanges.iter().any(|e| e == exchange) && self.symbols.iter().any(|s| s == symbol)
    }
}

/// Pushed to subscribers every time a stream produces a new point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub exchange: String,
    pub symbol: Symbol,
    /// Channels some subscriber of this stream asked for
    pub channels: Vec<UpdateChannel>,
    pub point: QuotePoint,
}

impl UpdateEvent {
    pub fn is_on(&self, channel: UpdateChannel) -> bool {
        self.channels.contains(&channel)
    }
}
