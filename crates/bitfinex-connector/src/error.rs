/*
[INPUT]:  Error sources (HTTP, API, serialization, WebSocket transport, subscription bookkeeping)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::types::SubscriptionKey;

/// Main error type for the Bitfinex connector
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket I/O failed on an established link
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// WebSocket handshake failed
    #[error("Connection failed: {0}")]
    Connection(#[source] Arc<tungstenite::Error>),

    /// Connection timeout
    #[error("Connection timeout after {duration}s")]
    Timeout { duration: u64 },

    /// No open link to send on
    #[error("WebSocket not connected")]
    NotConnected,

    /// Link was torn down before the operation completed
    #[error("WebSocket connection closed")]
    Closed,

    /// Candle period has no exchange timeframe
    #[error("Unsupported candle period: {seconds} seconds")]
    UnsupportedPeriod { seconds: i64 },

    /// Same feed requested twice
    #[error("Already subscribed to {key}")]
    AlreadySubscribed { key: SubscriptionKey },

    /// Data frame for a channel id with no active subscription
    #[error("Unknown channel id {chan_id}")]
    UnknownChannel { chan_id: u64 },

    /// Frame or row did not match the expected layout
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Http(_)
                | ConnectorError::Timeout { .. }
                | ConnectorError::WebSocket(_)
                | ConnectorError::Connection(_)
                | ConnectorError::NotConnected
                | ConnectorError::Closed
                | ConnectorError::InvalidResponse(_)
        )
    }

    /// Get retry delay in seconds (if retryable)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            ConnectorError::Timeout { .. } => Some(1),
            ConnectorError::Connection(_) | ConnectorError::Closed => Some(1),
            _ => None,
        }
    }

    /// Check if the error was caused by the caller's input rather than the exchange
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::UnsupportedPeriod { .. }
                | ConnectorError::AlreadySubscribed { .. }
                | ConnectorError::Config(_)
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        ConnectorError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;
