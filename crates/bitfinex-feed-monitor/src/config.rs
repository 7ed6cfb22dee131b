/*
[INPUT]:  YAML configuration file
[OUTPUT]: Validated monitor configuration and the connector settings derived from it
[POS]:    Configuration layer - feed setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;

use anyhow::{Context, bail};
use bitfinex_connector::{
    ClientConfig, ConnectorConfig, ReconnectPolicy, WsConfig, seconds_to_timeframe,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the feed monitor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// REST base URL override
    #[serde(default)]
    pub rest_url: Option<String>,
    /// WebSocket URL override
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Reconnect and resubscribe after the stream drops
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Trades fetched per symbol before streaming starts (0 skips)
    #[serde(default)]
    pub backfill_trades: u32,
    /// Candles fetched per period before streaming starts (0 skips)
    #[serde(default)]
    pub backfill_candles: u32,
    /// Seconds between stats log lines
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// Feeds to stream
    pub feeds: Vec<FeedConfig>,
}

/// Feeds for one symbol
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Exchange symbol (e.g., "tBTCUSD")
    pub symbol: String,
    #[serde(default = "default_trades")]
    pub trades: bool,
    /// Candle periods in seconds
    #[serde(default)]
    pub candles: Vec<i64>,
}

fn default_max_retries() -> u32 {
    10
}

fn default_stats_interval_secs() -> u64 {
    30
}

fn default_trades() -> bool {
    true
}

impl MonitorConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(content).context("parse config yaml")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Trim symbols so validation and subscriptions see the same value.
    pub fn normalize(&mut self) {
        for feed in &mut self.feeds {
            let trimmed = feed.symbol.trim();
            if trimmed.len() != feed.symbol.len() {
                feed.symbol = trimmed.to_string();
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feeds.is_empty() {
            bail!("at least one feed must be configured");
        }
        if self.stats_interval_secs == 0 {
            bail!("stats_interval_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            let symbol = feed.symbol.trim();
            if symbol.is_empty() {
                bail!("feed symbol must not be empty");
            }
            if !seen.insert(symbol) {
                bail!("feed {symbol} is configured more than once");
            }
            if !feed.trades && feed.candles.is_empty() {
                bail!("feed {symbol} streams neither trades nor candles");
            }
            let mut periods = HashSet::new();
            for period in &feed.candles {
                seconds_to_timeframe(*period).with_context(|| format!("feed {symbol}"))?;
                if !periods.insert(*period) {
                    bail!("feed {symbol} lists candle period {period} more than once");
                }
            }
        }
        Ok(())
    }

    /// Number of individual subscriptions the feeds expand to
    pub fn subscription_count(&self) -> usize {
        self.feeds
            .iter()
            .map(|feed| usize::from(feed.trades) + feed.candles.len())
            .sum()
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        let mut rest = ClientConfig::default();
        if let Some(url) = &self.rest_url {
            rest.base_url = url.clone();
        }

        let mut ws = match &self.ws_url {
            Some(url) => WsConfig::with_url(url),
            None => WsConfig::default(),
        };
        ws.reconnect = if self.reconnect {
            ReconnectPolicy::enabled(self.max_retries)
        } else {
            ReconnectPolicy::disabled()
        };

        ConnectorConfig { rest, ws }
    }
}
