/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Bitfinex market-data connector surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod connector;
pub mod error;
pub mod http;
pub mod timeframe;
pub mod types;
pub mod ws;

pub use connector::{Connector, ConnectorConfig};
pub use error::{ConnectorError, Result};

// Re-export commonly used types from http
pub use http::{BitfinexClient, CandleQuery, ClientConfig, HistoricalData};

// Re-export all types
pub use types::*;

pub use timeframe::{seconds_to_timeframe, timeframe_to_seconds};

// Re-export commonly used types from ws
pub use ws::{
    BitfinexWebSocket,
    ConnectionState,
    HandlerId,
    ReconnectPolicy,
    WsConfig,
};
