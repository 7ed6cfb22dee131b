/*
[INPUT]:  WebSocket configuration and feed subscriptions
[OUTPUT]: Live trades and candles from one managed connection
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod message;
pub mod registry;

pub use client::BitfinexWebSocket;
pub use config::{DEFAULT_WS_URL, ReconnectPolicy, WsConfig};
pub use connection::{ConnectionManager, ConnectionState, LinkLossReason, LinkLost};
pub use dispatcher::{DispatchOutcome, Dispatcher, DropReason};
pub use events::{EventHandlers, FeedEvents, HandlerId};
pub use message::{EventMessage, InboundFrame, decode_frame};
pub use registry::SubscriptionRegistry;
