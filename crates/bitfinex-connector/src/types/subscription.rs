/*
[INPUT]:  Logical feed requests (feed type, symbol, candle timeframe)
[OUTPUT]: Subscription keys, registry entries and their subscribe control frames
[POS]:    Data layer - identity of a streaming subscription
[UPDATE]: When subscribe payloads or key composition change
*/

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::enums::{FeedType, SubscriptionStatus};
use crate::timeframe::candle_key;

/// Identity of one streaming subscription.
///
/// Trades are keyed by symbol; candles by symbol and timeframe token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "feed", rename_all = "lowercase")]
pub enum SubscriptionKey {
    Trades { symbol: String },
    Candles { symbol: String, timeframe: String },
}

impl SubscriptionKey {
    pub fn trades(symbol: impl Into<String>) -> Self {
        SubscriptionKey::Trades {
            symbol: symbol.into(),
        }
    }

    pub fn candles(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        SubscriptionKey::Candles {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }

    pub fn feed_type(&self) -> FeedType {
        match self {
            SubscriptionKey::Trades { .. } => FeedType::Trades,
            SubscriptionKey::Candles { .. } => FeedType::Candles,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            SubscriptionKey::Trades { symbol } | SubscriptionKey::Candles { symbol, .. } => symbol,
        }
    }

    pub fn timeframe(&self) -> Option<&str> {
        match self {
            SubscriptionKey::Trades { .. } => None,
            SubscriptionKey::Candles { timeframe, .. } => Some(timeframe),
        }
    }

    /// Subscribe control frame for this key.
    pub fn subscribe_message(&self) -> Value {
        match self {
            SubscriptionKey::Trades { symbol } => json!({
                "event": "subscribe",
                "channel": "trades",
                "symbol": symbol
            }),
            SubscriptionKey::Candles { symbol, timeframe } => json!({
                "event": "subscribe",
                "channel": "candles",
                "key": candle_key(timeframe, symbol)
            }),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKey::Trades { symbol } => write!(f, "trades {symbol}"),
            SubscriptionKey::Candles { symbol, timeframe } => {
                write!(f, "candles {}", candle_key(timeframe, symbol))
            }
        }
    }
}

/// Unsubscribe control frame for a bound channel.
pub fn unsubscribe_message(chan_id: u64) -> Value {
    json!({
        "event": "unsubscribe",
        "chanId": chan_id
    })
}

/// Registry entry for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub key: SubscriptionKey,
    /// Assigned by the exchange on ack; absent while pending
    pub channel_id: Option<u64>,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn pending(key: SubscriptionKey) -> Self {
        Self {
            key,
            channel_id: None,
            status: SubscriptionStatus::Pending,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}
