/*
[INPUT]:  WebSocket endpoint, outbound control frames
[OUTPUT]: One managed link: lifecycle state, serialized writes, a read loop feeding dispatch
[POS]:    WebSocket layer - connection lifecycle
[UPDATE]: When changing connect, close or link-loss behaviour
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::config::WsConfig;
use super::dispatcher::Dispatcher;
use crate::error::{ConnectorError, Result};
use crate::types::SubscriptionKey;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<(), AttemptError>>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Why a link ended without `close()` being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLossReason {
    RemoteClosed,
    ReadFailed,
    WriteFailed,
    IdleTimeout,
}

/// Sent on the link-loss hook when an open link drops on its own.
///
/// By the time it is sent the subscriptions bound to the dead link have
/// already been released: cleared, or returned to pending when the link is
/// meant to be re-established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLost {
    pub reason: LinkLossReason,
    /// Subscriptions reset to pending, to be requested again on the next link
    pub resubscribe: Vec<SubscriptionKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkExit {
    Shutdown,
    Lost(LinkLossReason),
}

/// Outcome of one handshake, shared by every caller waiting on it.
#[derive(Debug, Clone)]
enum AttemptError {
    Transport(Arc<tungstenite::Error>),
    TimedOut(Duration),
    Cancelled,
}

impl AttemptError {
    fn into_error(self) -> ConnectorError {
        match self {
            AttemptError::Transport(source) => ConnectorError::Connection(source),
            AttemptError::TimedOut(duration) => ConnectorError::Timeout {
                duration: duration.as_secs(),
            },
            AttemptError::Cancelled => ConnectorError::Closed,
        }
    }
}

struct PendingAttempt {
    generation: u64,
    future: ConnectAttempt,
    cancel: CancellationToken,
}

struct Outbound {
    message: WsMessage,
    written: oneshot::Sender<std::result::Result<(), tungstenite::Error>>,
}

struct Link {
    generation: u64,
    outbound_tx: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    url: Url,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    outbound_capacity: usize,
    resubscribe_on_loss: bool,
    dispatcher: Arc<Dispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    attempt: Mutex<Option<PendingAttempt>>,
    /// Bumped by every connect attempt and every close; a link or attempt is
    /// current only while this still equals the value it started with.
    generation: AtomicU64,
    link_lost_tx: Option<mpsc::UnboundedSender<LinkLost>>,
}

/// Owns the duplex link to the exchange.
///
/// Cloning is cheap and every clone drives the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    /// `link_lost_tx` receives a [`LinkLost`] whenever an open link drops
    /// without `close()`; it is the hook reconnection logic hangs off.
    pub fn new(
        config: &WsConfig,
        dispatcher: Arc<Dispatcher>,
        link_lost_tx: Option<mpsc::UnboundedSender<LinkLost>>,
    ) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        if config.outbound_capacity == 0 {
            return Err(ConnectorError::Config(
                "outbound_capacity must be greater than zero".to_string(),
            ));
        }
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                connect_timeout: config.connect_timeout,
                idle_timeout: config.idle_timeout,
                outbound_capacity: config.outbound_capacity,
                resubscribe_on_loss: config.reconnect.enabled,
                dispatcher,
                state_tx,
                link: Mutex::new(None),
                attempt: Mutex::new(None),
                generation: AtomicU64::new(0),
                link_lost_tx,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.link).is_some()
    }

    /// Open the link unless it already is.
    ///
    /// Concurrent callers share one in-flight handshake and all observe its
    /// outcome; a second handshake is never started while one is running.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let attempt = {
            let mut slot = lock(&self.inner.attempt);
            if self.is_open() {
                return Ok(());
            }
            match slot.as_ref() {
                Some(pending) => pending.future.clone(),
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let cancel = CancellationToken::new();
                    let future = establish(self.inner.clone(), generation, cancel.clone())
                        .boxed()
                        .shared();
                    *slot = Some(PendingAttempt {
                        generation,
                        future: future.clone(),
                        cancel,
                    });
                    self.inner.set_state(ConnectionState::Connecting);
                    future
                }
            }
        };

        attempt.await.map_err(AttemptError::into_error)
    }

    /// Write one frame. Resolves once the frame is on the wire.
    pub async fn send(&self, frame: &Value) -> Result<()> {
        let outbound_tx = lock(&self.inner.link)
            .as_ref()
            .map(|link| link.outbound_tx.clone())
            .ok_or(ConnectorError::NotConnected)?;

        let (written_tx, written_rx) = oneshot::channel();
        outbound_tx
            .send(Outbound {
                message: WsMessage::Text(frame.to_string().into()),
                written: written_tx,
            })
            .await
            .map_err(|_| ConnectorError::NotConnected)?;

        match written_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ConnectorError::WebSocket(err)),
            Err(_) => Err(ConnectorError::Closed),
        }
    }

    /// Tear the link down. Idempotent.
    ///
    /// An attempt still connecting is cancelled: its callers get `Closed` and
    /// the next `ensure_connected` starts a fresh handshake.
    pub async fn close(&self) {
        let link = self.detach();
        self.cancel_attempt();

        if link.is_none() && self.state() == ConnectionState::Disconnected {
            return;
        }
        self.inner.set_state(ConnectionState::Closing);

        if let Some(link) = link {
            link.shutdown.cancel();
            drop(link.outbound_tx);
            let mut task = link.task;
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!(timeout = ?CLOSE_TIMEOUT, "ws link task did not stop; aborting");
                task.abort();
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        info!(url = %self.inner.url, "ws connection closed");
    }

    /// Non-blocking teardown for `Drop` paths: signals the I/O task to send a
    /// close frame and exit, without waiting for it.
    pub fn shutdown(&self) {
        let link = self.detach();
        let cancelled = self.cancel_attempt();
        if let Some(link) = &link {
            link.shutdown.cancel();
        }
        if link.is_some() || cancelled {
            self.inner.set_state(ConnectionState::Disconnected);
        }
    }

    fn cancel_attempt(&self) -> bool {
        match lock(&self.inner.attempt).take() {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn detach(&self) -> Option<Link> {
        let mut slot = lock(&self.inner.link);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        slot.take()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "ws connection state");
        }
    }

    /// Install a freshly handshaken stream unless `close()` ran meanwhile.
    fn install_link(self: &Arc<Self>, generation: u64, stream: WsStream) -> bool {
        let mut slot = lock(&self.link);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_link(
            self.clone(),
            generation,
            stream,
            outbound_rx,
            shutdown.clone(),
        ));
        *slot = Some(Link {
            generation,
            outbound_tx,
            shutdown,
            task,
        });
        self.set_state(ConnectionState::Open);
        true
    }

    /// Called by the read loop as it exits.
    ///
    /// Channel ids die with the link, so subscriptions are released before
    /// anyone can observe `Disconnected` or install the next link.
    fn finish_link(&self, generation: u64, exit: LinkExit) {
        let resubscribe = {
            let mut slot = lock(&self.link);
            if !slot.as_ref().is_some_and(|link| link.generation == generation) {
                return;
            }
            slot.take();
            match exit {
                LinkExit::Lost(_) => self.dispatcher.release_channels(self.resubscribe_on_loss),
                LinkExit::Shutdown => Vec::new(),
            }
        };

        self.set_state(ConnectionState::Disconnected);
        if let LinkExit::Lost(reason) = exit {
            warn!(url = %self.url, ?reason, pending = resubscribe.len(), "ws link lost");
            if let Some(tx) = &self.link_lost_tx {
                let _ = tx.send(LinkLost {
                    reason,
                    resubscribe,
                });
            }
        }
    }

    /// Release the attempt slot. A slot already taken by `close()` or
    /// replaced by a newer attempt is left alone, and so is the state.
    fn finish_attempt(&self, generation: u64, failed: bool) {
        let mut slot = lock(&self.attempt);
        if slot.as_ref().is_some_and(|pending| pending.generation == generation) {
            *slot = None;
            if failed {
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }
}

async fn establish(
    inner: Arc<Inner>,
    generation: u64,
    cancel: CancellationToken,
) -> std::result::Result<(), AttemptError> {
    info!(url = %inner.url, "ws connecting");

    let connect = tokio::time::timeout(inner.connect_timeout, connect_async(inner.url.as_str()));
    let handshake = tokio::select! {
        _ = cancel.cancelled() => None,
        handshake = connect => Some(handshake),
    };
    let result = match handshake {
        None => {
            debug!(url = %inner.url, "ws connect cancelled by close");
            Err(AttemptError::Cancelled)
        }
        Some(Ok(Ok((stream, _response)))) => {
            if inner.install_link(generation, stream) {
                info!(url = %inner.url, "ws connected");
                Ok(())
            } else {
                debug!(url = %inner.url, "ws connection closed during handshake; discarding");
                Err(AttemptError::Cancelled)
            }
        }
        Some(Ok(Err(err))) => {
            warn!(url = %inner.url, error = %err, "ws connect failed");
            Err(AttemptError::Transport(Arc::new(err)))
        }
        Some(Err(_)) => {
            warn!(url = %inner.url, timeout = ?inner.connect_timeout, "ws connect timed out");
            Err(AttemptError::TimedOut(inner.connect_timeout))
        }
    };

    inner.finish_attempt(generation, result.is_err());
    result
}

async fn run_link(
    inner: Arc<Inner>,
    generation: u64,
    stream: WsStream,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
) {
    let (mut write, mut read) = stream.split();
    let idle_timeout = inner.idle_timeout;
    let mut idle_deadline = idle_timeout.map(|timeout| Instant::now() + timeout);

    let exit = loop {
        let deadline = idle_deadline;
        let idle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                break LinkExit::Shutdown;
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound { message, written }) => {
                        let result = write.send(message).await;
                        let failed = result.is_err();
                        let _ = written.send(result);
                        if failed {
                            break LinkExit::Lost(LinkLossReason::WriteFailed);
                        }
                    }
                    None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break LinkExit::Shutdown;
                    }
                }
            }
            incoming = read.next() => {
                if let Some(timeout) = idle_timeout {
                    idle_deadline = Some(Instant::now() + timeout);
                }
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        inner.dispatcher.dispatch_text(text.as_str());
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            inner.dispatcher.dispatch_text(text);
                        }
                        Err(_) => debug!(bytes = bytes.len(), "ws binary frame is not utf-8"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "ws close frame received");
                        break LinkExit::Lost(LinkLossReason::RemoteClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "ws read failed");
                        break LinkExit::Lost(LinkLossReason::ReadFailed);
                    }
                    None => break LinkExit::Lost(LinkLossReason::RemoteClosed),
                }
            }
            _ = idle => {
                warn!(timeout = ?idle_timeout, "ws link idle");
                break LinkExit::Lost(LinkLossReason::IdleTimeout);
            }
        }
    };

    inner.finish_link(generation, exit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::events::FeedEvents;
    use crate::ws::registry::SubscriptionRegistry;
    use serde_json::json;

    fn manager(url: &str) -> ConnectionManager {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(FeedEvents::new()),
        ));
        let config = WsConfig {
            connect_timeout: Duration::from_secs(2),
            ..WsConfig::with_url(url)
        };
        ConnectionManager::new(&config, dispatcher, None).expect("manager")
    }

    async fn refused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("ws://{addr}")
    }

    #[test]
    fn rejects_invalid_url() {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(FeedEvents::new()),
        ));
        let err = ConnectionManager::new(&WsConfig::with_url("not a url"), dispatcher, None)
            .expect_err("invalid url");
        assert!(matches!(err, ConnectorError::UrlParse(_)));
    }

    #[tokio::test]
    async fn send_requires_open_link() {
        let manager = manager("ws://127.0.0.1:9");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        let err = manager
            .send(&json!({"event": "ping"}))
            .await
            .expect_err("not connected");
        assert!(matches!(err, ConnectorError::NotConnected));
    }

    #[tokio::test]
    async fn close_without_link_is_noop() {
        let manager = manager("ws://127.0.0.1:9");
        manager.close().await;
        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_handshake_returns_to_disconnected() {
        let manager = manager(&refused_url().await);
        let err = manager.ensure_connected().await.expect_err("refused");
        assert!(matches!(err, ConnectorError::Connection(_)), "{err:?}");
        assert!(err.is_retryable());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn close_fails_queued_send_with_closed() {
        let manager = manager("ws://127.0.0.1:9");
        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let queue = outbound_tx.clone();
        let shutdown = CancellationToken::new();
        // Holds the queue without writing until torn down.
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                drop(outbound_rx);
            }
        });
        *lock(&manager.inner.link) = Some(Link {
            generation: 0,
            outbound_tx,
            shutdown,
            task,
        });
        manager.inner.set_state(ConnectionState::Open);

        let send = tokio::spawn({
            let manager = manager.clone();
            async move { manager.send(&json!({"event": "ping"})).await }
        });
        while queue.capacity() == queue.max_capacity() {
            tokio::task::yield_now().await;
        }

        manager.close().await;
        let err = send.await.expect("send task").expect_err("torn down");
        assert!(matches!(err, ConnectorError::Closed), "{err:?}");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
