/*
[INPUT]:  Monitor configuration, shutdown token
[OUTPUT]: Backfilled history and live feed events logged through tracing, with per-symbol stats
[POS]:    Runtime layer - drives the connector for the configured feeds
[UPDATE]: When changing startup order, reporting, or shutdown semantics
*/

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bitfinex_connector::{
    CandleQuery, ConnectionState, Connector, ConnectorError, HandlerId, HistoricalData,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::metrics::FeedStats;

/// Totals from the history fetched before streaming starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub trades: usize,
    pub candles: usize,
}

pub struct FeedMonitor {
    config: MonitorConfig,
    connector: Connector,
    stats: Arc<FeedStats>,
    handlers: Vec<HandlerId>,
}

impl FeedMonitor {
    pub fn new(mut config: MonitorConfig) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let connector =
            Connector::with_config(config.connector_config()).context("create connector")?;
        let stats = Arc::new(FeedStats::new());
        let stream = connector.stream();

        let handlers = vec![
            {
                let stats = stats.clone();
                stream.on_buy_trade(move |trade| {
                    stats.record_trade(trade);
                    debug!(
                        pair = %trade.pair,
                        id = %trade.id,
                        amount = %trade.amount,
                        price = %trade.price,
                        "buy trade"
                    );
                })
            },
            {
                let stats = stats.clone();
                stream.on_sell_trade(move |trade| {
                    stats.record_trade(trade);
                    debug!(
                        pair = %trade.pair,
                        id = %trade.id,
                        amount = %trade.amount,
                        price = %trade.price,
                        "sell trade"
                    );
                })
            },
            {
                let stats = stats.clone();
                stream.on_candle(move |candle| {
                    stats.record_candle(candle);
                    debug!(
                        pair = %candle.pair,
                        open_time = %candle.open_time,
                        close = %candle.close_price,
                        volume = %candle.total_volume,
                        "candle"
                    );
                })
            },
        ];

        Ok(Self {
            config,
            connector,
            stats,
            handlers,
        })
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        self.stats.clone()
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Fetch recent history for every feed.
    ///
    /// A transient failure is retried once; anything still failing is logged
    /// per feed and skipped.
    pub async fn backfill(&self) -> BackfillSummary {
        let mut summary = BackfillSummary::default();

        for feed in &self.config.feeds {
            if feed.trades && self.config.backfill_trades > 0 {
                let limit = self.config.backfill_trades;
                let fetch = move || self.connector.get_trades(&feed.symbol, limit);
                match retry_transient(fetch).await {
                    Ok(trades) => {
                        info!(
                            symbol = %feed.symbol,
                            count = trades.len(),
                            last_price = ?trades.first().map(|trade| trade.price),
                            "trades backfilled"
                        );
                        summary.trades += trades.len();
                    }
                    Err(err) => warn!(symbol = %feed.symbol, error = %err, "trade backfill failed"),
                }
            }

            if self.config.backfill_candles == 0 {
                continue;
            }
            for period in &feed.candles {
                let query = CandleQuery::new().limit(self.config.backfill_candles);
                let query = &query;
                let fetch = move || self.connector.get_candles(&feed.symbol, *period, query);
                match retry_transient(fetch).await {
                    Ok(candles) => {
                        info!(
                            symbol = %feed.symbol,
                            period,
                            count = candles.len(),
                            "candles backfilled"
                        );
                        summary.candles += candles.len();
                    }
                    Err(err) => {
                        warn!(symbol = %feed.symbol, period, error = %err, "candle backfill failed")
                    }
                }
            }
        }

        summary
    }

    /// Subscribe every configured feed.
    pub async fn subscribe_all(&self) -> Result<()> {
        let stream = self.connector.stream();
        for feed in &self.config.feeds {
            if feed.trades {
                stream
                    .subscribe_trades(&feed.symbol)
                    .await
                    .with_context(|| format!("subscribe trades {}", feed.symbol))?;
            }
            for period in &feed.candles {
                stream
                    .subscribe_candles(&feed.symbol, *period)
                    .await
                    .with_context(|| format!("subscribe candles {} {period}s", feed.symbol))?;
            }
        }
        info!(subscriptions = self.config.subscription_count(), "feeds subscribed");
        Ok(())
    }

    /// Report stats until `shutdown` fires.
    ///
    /// Without reconnection a dropped stream ends the run with an error.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut state = self.connector.stream().connection_state();
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.stats_interval_secs));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("monitor shutdown requested");
                    return Ok(());
                }
                _ = ticker.tick() => self.log_stats(),
                changed = state.changed() => {
                    if changed.is_err() {
                        bail!("connection state channel closed");
                    }
                    let current = *state.borrow_and_update();
                    info!(state = ?current, "feed connection state");
                    if current == ConnectionState::Disconnected && !self.config.reconnect {
                        bail!("feed connection lost");
                    }
                }
            }
        }
    }

    /// Unsubscribe every feed and close the stream.
    pub async fn shutdown(&self) {
        let stream = self.connector.stream();
        for feed in &self.config.feeds {
            if feed.trades {
                stream.unsubscribe_trades(&feed.symbol).await;
            }
            for period in &feed.candles {
                stream.unsubscribe_candles(&feed.symbol, *period).await;
            }
        }
        for id in &self.handlers {
            stream.remove_handler(*id);
        }
        self.connector.close().await;
        self.log_stats();
    }

    fn log_stats(&self) {
        for (symbol, stats) in self.stats.snapshot_all() {
            info!(
                %symbol,
                buy_trades = stats.buy_trades,
                sell_trades = stats.sell_trades,
                candles = stats.candles,
                last_trade_price = ?stats.last_trade_price,
                last_close = ?stats.last_close,
                "feed stats"
            );
        }
    }
}

async fn retry_transient<T, F, Fut>(mut fetch: F) -> std::result::Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ConnectorError>>,
{
    match fetch().await {
        Err(err) => match err.retry_delay() {
            Some(delay) => {
                debug!(error = %err, delay, "backfill request failed; retrying");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                fetch().await
            }
            None => Err(err),
        },
        fetched => fetched,
    }
}
