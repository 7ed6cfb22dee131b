/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities: a local exchange WebSocket and mock REST server
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for bitfinex-connector tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

pub const WAIT: Duration = Duration::from_secs(5);

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

enum ServerCommand {
    Send(String),
    Close,
}

/// Stand-in for the exchange stream on 127.0.0.1.
///
/// Records every frame clients send and lets the test push frames to the most
/// recently accepted connection.
pub struct MockExchange {
    pub url: String,
    accepted: Arc<AtomicUsize>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>>,
}

impl MockExchange {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let current: Arc<Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>> =
            Arc::new(Mutex::new(None));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        {
            let accepted = accepted.clone();
            let current = current.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let (command_tx, command_rx) = mpsc::unbounded_channel();
                    *current.lock().unwrap() = Some(command_tx);
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(ws, command_rx, inbound_tx.clone()));
                }
            });
        }

        Self {
            url: format!("ws://{addr}"),
            accepted,
            inbound_rx,
            current,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next frame a client sent, as JSON.
    pub async fn next_request(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.inbound_rx.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("server stopped");
        serde_json::from_str(&text).expect("client sent invalid json")
    }

    /// Push a frame to the latest connection.
    pub fn send(&self, frame: Value) {
        let guard = self.current.lock().unwrap();
        let tx = guard.as_ref().expect("no client connected");
        tx.send(ServerCommand::Send(frame.to_string()))
            .expect("connection task stopped");
    }

    /// Read the next subscribe request and acknowledge it on `chan_id`.
    pub async fn ack_next(&mut self, chan_id: u64) -> Value {
        let request = self.next_request().await;
        assert_eq!(request["event"], "subscribe", "unexpected request {request}");
        self.send(subscribed_ack(&request, chan_id));
        request
    }

    /// Close the latest connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.current.lock().unwrap().take() {
            let _ = tx.send(ServerCommand::Close);
        }
    }
}

/// Endpoint that accepts TCP connections but never answers the WebSocket
/// handshake, so every connect attempt stalls until it times out or is
/// cancelled.
pub struct StalledEndpoint {
    pub url: String,
    accepted: Arc<AtomicUsize>,
}

impl StalledEndpoint {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));

        {
            let accepted = accepted.clone();
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        Self {
            url: format!("ws://{addr}"),
            accepted,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Ack the exchange would send for `request`.
pub fn subscribed_ack(request: &Value, chan_id: u64) -> Value {
    let mut ack = json!({
        "event": "subscribed",
        "channel": request["channel"],
        "chanId": chan_id,
    });
    if let Some(symbol) = request.get("symbol") {
        ack["symbol"] = symbol.clone();
        ack["pair"] = json!(symbol.as_str().unwrap_or_default().trim_start_matches('t'));
    }
    if let Some(key) = request.get("key") {
        ack["key"] = key.clone();
    }
    ack
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut command_rx: mpsc::UnboundedReceiver<ServerCommand>,
    inbound_tx: mpsc::UnboundedSender<String>,
) {
    let (mut write, mut read) = ws.split();
    let _ = write
        .send(Message::Text(
            json!({"event": "info", "version": 2, "platform": {"status": 1}})
                .to_string()
                .into(),
        ))
        .await;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(ServerCommand::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound_tx.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future` or fail the test.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}
