/*
[INPUT]:  Caller-supplied streaming options
[OUTPUT]: Validated WebSocket endpoint, timeouts and reconnection policy
[POS]:    WebSocket layer - configuration
[UPDATE]: When adding connection options or changing defaults
*/

use std::time::Duration;

/// Public market-data stream
pub const DEFAULT_WS_URL: &str = "wss://api-pub.bitfinex.com/ws/2";

const MAX_BACKOFF_SECS: u64 = 30;

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Drop the link when nothing (not even a heartbeat) arrives for this long
    pub idle_timeout: Option<Duration>,
    /// Outbound frames queued ahead of the writer
    pub outbound_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            // Heartbeats arrive every 15s per channel.
            idle_timeout: Some(Duration::from_secs(45)),
            outbound_capacity: 100,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl WsConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// What to do after the link drops on its own.
///
/// Disabled by default: subscriptions are cleared and the caller subscribes
/// again. When enabled, the client reconnects with exponential backoff and
/// resubscribes every feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Give up after this many consecutive failed attempts
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
        }
    }

    pub fn enabled(max_retries: u32) -> Self {
        Self {
            enabled: true,
            max_retries,
        }
    }

    /// Delay before attempt `retry_count` (1-based): 1s, 2s, 4s ... clamped at 30s.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(63);
        let secs = 1u64 << exp;
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_clamps_at_30s() {
        let policy = ReconnectPolicy::enabled(10);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(100), Duration::from_secs(30));
    }

    #[test]
    fn reconnect_disabled_by_default() {
        let config = WsConfig::default();
        assert!(!config.reconnect.enabled);
        assert_eq!(config.url, DEFAULT_WS_URL);
    }
}
