/*
[INPUT]:  Exchange feed vocabulary and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When new feed kinds or sides are added
*/

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side of a trade from the sign of the raw exchange amount.
    ///
    /// Returns `None` for a zero amount, which carries no direction.
    pub fn from_signed_amount(amount: rust_decimal::Decimal) -> Option<Self> {
        if amount.is_sign_positive() && !amount.is_zero() {
            Some(Side::Buy)
        } else if amount.is_sign_negative() && !amount.is_zero() {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Streaming feed kinds the exchange exposes publicly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Trades,
    Candles,
}

impl FeedType {
    /// Channel name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Trades => "trades",
            FeedType::Candles => "candles",
        }
    }

    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            "trades" => Some(FeedType::Trades),
            "candles" => Some(FeedType::Candles),
            _ => None,
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Subscribe frame sent, ack not yet received
    Pending,
    /// Ack received, channel id bound
    Active,
}
