/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Decoded control events and channel data frames
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Second element of a heartbeat data frame
pub const HEARTBEAT: &str = "hb";
/// Trade executed
pub const TRADE_EXECUTED: &str = "te";
/// Trade execution update
pub const TRADE_UPDATED: &str = "tu";

/// One decoded inbound frame.
///
/// Control traffic arrives as JSON objects, channel data as JSON arrays whose
/// first element is the channel id.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Event(EventMessage),
    Channel(Vec<Value>),
}

/// Control message (`subscribed`, `unsubscribed`, `info`, `error`, ...)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "chanId", default, skip_serializing_if = "Option::is_none")]
    pub chan_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    Ok(serde_json::from_str(text)?)
}
