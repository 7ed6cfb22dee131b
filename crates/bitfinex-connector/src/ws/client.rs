/*
[INPUT]:  Trade/candle subscription requests and event callbacks from callers
[OUTPUT]: Live trades and candles delivered to registered callbacks
[POS]:    WebSocket layer - public streaming client
[UPDATE]: When adding feeds or changing subscription or reconnection behaviour
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{ReconnectPolicy, WsConfig};
use super::connection::{ConnectionManager, ConnectionState, LinkLost};
use super::dispatcher::Dispatcher;
use super::events::{FeedEvents, HandlerId};
use super::registry::SubscriptionRegistry;
use crate::error::{ConnectorError, Result};
use crate::timeframe::seconds_to_timeframe;
use crate::types::{Candle, Subscription, SubscriptionKey, Trade, unsubscribe_message};

/// Streaming client for public trades and candles.
///
/// One duplex connection carries every subscription. Subscribing connects on
/// demand; parsed entities are delivered to callbacks registered with
/// [`on_buy_trade`](Self::on_buy_trade), [`on_sell_trade`](Self::on_sell_trade)
/// and [`on_candle`](Self::on_candle). Callbacks run on the read loop, so
/// anything slow must be handed off.
pub struct BitfinexWebSocket {
    connection: ConnectionManager,
    registry: Arc<SubscriptionRegistry>,
    events: Arc<FeedEvents>,
    reconnect: ReconnectPolicy,
    link_lost_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkLost>>>,
    supervisor: CancellationToken,
    closed: AtomicBool,
}

impl std::fmt::Debug for BitfinexWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitfinexWebSocket")
            .field("connection", &self.connection)
            .field("subscriptions", &self.registry.len())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl BitfinexWebSocket {
    /// Client for the public production stream with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(WsConfig::default())
    }

    pub fn with_config(config: WsConfig) -> Result<Self> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let events = Arc::new(FeedEvents::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), events.clone()));
        let (link_lost_tx, link_lost_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(&config, dispatcher, Some(link_lost_tx))?;

        Ok(Self {
            connection,
            registry,
            events,
            reconnect: config.reconnect,
            link_lost_rx: Mutex::new(Some(link_lost_rx)),
            supervisor: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the connection if it is not already open.
    ///
    /// Subscribing does this implicitly; after the link drops with
    /// reconnection disabled, callers invoke it (or subscribe again) to
    /// re-establish.
    pub async fn ensure_connected(&self) -> Result<()> {
        self.check_open()?;
        self.start_supervisor();
        self.connection.ensure_connected().await
    }

    /// Subscribe to executed trades for `symbol` (e.g. `tBTCUSD`).
    ///
    /// Returns once the request is written; the subscription turns active
    /// when the exchange acknowledges it.
    pub async fn subscribe_trades(&self, symbol: &str) -> Result<()> {
        self.subscribe(SubscriptionKey::trades(symbol)).await
    }

    /// Subscribe to candles of `period_secs` for `symbol`.
    pub async fn subscribe_candles(&self, symbol: &str, period_secs: i64) -> Result<()> {
        let timeframe = seconds_to_timeframe(period_secs)?;
        self.subscribe(SubscriptionKey::candles(symbol, timeframe)).await
    }

    /// Stop delivering trades for `symbol`. Returns whether a subscription was removed.
    pub async fn unsubscribe_trades(&self, symbol: &str) -> bool {
        self.unsubscribe(&SubscriptionKey::trades(symbol)).await
    }

    /// Stop delivering candles for `symbol`. An unsupported period matches nothing.
    pub async fn unsubscribe_candles(&self, symbol: &str, period_secs: i64) -> bool {
        match seconds_to_timeframe(period_secs) {
            Ok(timeframe) => {
                self.unsubscribe(&SubscriptionKey::candles(symbol, timeframe))
                    .await
            }
            Err(_) => false,
        }
    }

    pub fn on_buy_trade<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.events.buy_trades.add(callback)
    }

    pub fn on_sell_trade<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.events.sell_trades.add(callback)
    }

    pub fn on_candle<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&Candle) + Send + Sync + 'static,
    {
        self.events.candles.add(callback)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.events.remove(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state transitions.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.registry.snapshot()
    }

    pub fn subscription(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.registry.get(key)
    }

    /// Dispose of the client: stop reconnection, close the connection, forget
    /// every subscription and drop every callback. Later subscribe calls fail
    /// with `Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.cancel();
        self.connection.close().await;
        self.registry.clear();
        self.events.clear();
        info!("ws client closed");
    }

    async fn subscribe(&self, key: SubscriptionKey) -> Result<()> {
        self.ensure_connected().await?;
        self.registry.register_pending(key.clone())?;

        if let Err(err) = self.connection.send(&key.subscribe_message()).await {
            self.registry.remove(&key);
            warn!(%key, error = %err, "subscribe request failed");
            return Err(err);
        }
        info!(%key, "subscribe requested");
        Ok(())
    }

    async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let Some(removed) = self.registry.remove(key) else {
            debug!(%key, "unsubscribe for unknown subscription");
            return false;
        };
        info!(%key, chan_id = ?removed.channel_id, "unsubscribed");

        if let Some(chan_id) = removed.channel_id
            && self.connection.is_open()
            && let Err(err) = self.connection.send(&unsubscribe_message(chan_id)).await
        {
            debug!(chan_id, error = %err, "unsubscribe request not delivered");
        }
        true
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ConnectorError::Closed)
        } else {
            Ok(())
        }
    }

    fn start_supervisor(&self) {
        let receiver = self
            .link_lost_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link_lost_rx) = receiver {
            tokio::spawn(supervise(
                link_lost_rx,
                self.connection.clone(),
                self.registry.clone(),
                self.reconnect.clone(),
                self.supervisor.clone(),
            ));
        }
    }
}

impl Drop for BitfinexWebSocket {
    fn drop(&mut self) {
        self.supervisor.cancel();
        self.connection.shutdown();
    }
}

/// Reacts to links that drop on their own.
///
/// The connection has already released the dead link's subscriptions: cleared
/// without reconnection, back to pending with it. Here the link is
/// re-established with backoff and the pending keys are requested again.
async fn supervise(
    mut link_lost_rx: mpsc::UnboundedReceiver<LinkLost>,
    connection: ConnectionManager,
    registry: Arc<SubscriptionRegistry>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) {
    loop {
        let lost = tokio::select! {
            _ = shutdown.cancelled() => break,
            lost = link_lost_rx.recv() => match lost {
                Some(lost) => lost,
                None => break,
            },
        };

        if !policy.enabled {
            warn!(reason = ?lost.reason, "ws link lost; subscriptions cleared");
            continue;
        }

        let keys = lost.resubscribe;
        warn!(reason = ?lost.reason, subscriptions = keys.len(), "ws link lost; reconnecting");

        if !reconnect(&connection, &policy, &shutdown).await {
            if shutdown.is_cancelled() {
                break;
            }
            let dropped = registry.remove_pending(&keys);
            warn!(
                max_retries = policy.max_retries,
                dropped, "ws reconnect gave up; pending subscriptions dropped"
            );
            continue;
        }
        resubscribe(&connection, &registry, keys).await;
    }
    debug!("ws supervisor stopped");
}

async fn reconnect(
    connection: &ConnectionManager,
    policy: &ReconnectPolicy,
    shutdown: &CancellationToken,
) -> bool {
    for attempt in 1..=policy.max_retries {
        let delay = policy.backoff(attempt);
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        match connection.ensure_connected().await {
            Ok(()) => {
                info!(attempt, "ws reconnected");
                return true;
            }
            Err(err) => warn!(attempt, ?delay, error = %err, "ws reconnect attempt failed"),
        }
    }
    false
}

async fn resubscribe(
    connection: &ConnectionManager,
    registry: &SubscriptionRegistry,
    keys: Vec<SubscriptionKey>,
) {
    for key in keys {
        // Skip anything unsubscribed while the link was down.
        if registry.get(&key).is_none_or(|entry| entry.is_active()) {
            continue;
        }
        if let Err(err) = connection.send(&key.subscribe_message()).await {
            // The link dropped again; the next LinkLost restarts the cycle.
            warn!(%key, error = %err, "resubscribe failed");
            return;
        }
        debug!(%key, "resubscribe requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_period_fails_before_connecting() {
        let client = BitfinexWebSocket::with_config(WsConfig::with_url("ws://127.0.0.1:9"))
            .expect("client");
        let err = client
            .subscribe_candles("tBTCUSD", 61)
            .await
            .expect_err("unsupported period");
        assert!(matches!(err, ConnectorError::UnsupportedPeriod { seconds: 61 }));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_unknown_is_noop() {
        let client = BitfinexWebSocket::new().expect("client");
        assert!(!client.unsubscribe_trades("tBTCUSD").await);
        assert!(!client.unsubscribe_candles("tBTCUSD", 60).await);
        assert!(!client.unsubscribe_candles("tBTCUSD", 61).await);
    }

    #[tokio::test]
    async fn subscribe_after_close_fails() {
        let client = BitfinexWebSocket::new().expect("client");
        client.close().await;
        client.close().await;
        let err = client
            .subscribe_trades("tBTCUSD")
            .await
            .expect_err("closed");
        assert!(matches!(err, ConnectorError::Closed));
    }

    #[tokio::test]
    async fn close_drops_handlers_and_rejects_negative_period() {
        let client = BitfinexWebSocket::new().expect("client");
        let err = client
            .subscribe_candles("tBTCUSD", -60)
            .await
            .expect_err("negative period");
        assert!(matches!(err, ConnectorError::UnsupportedPeriod { seconds: -60 }));

        let sell = client.on_sell_trade(|_| {});
        client.close().await;
        assert!(!client.remove_handler(sell));
    }

    #[test]
    fn handlers_register_and_remove() {
        let client = BitfinexWebSocket::new().expect("client");
        let buy = client.on_buy_trade(|_| {});
        let candle = client.on_candle(|_| {});
        assert!(client.remove_handler(buy));
        assert!(!client.remove_handler(buy));
        assert!(client.remove_handler(candle));
    }
}
