/*
[INPUT]:  REST and streaming configuration
[OUTPUT]: One handle for historical fetches and live feeds
[POS]:    Crate root - composition of the HTTP and WebSocket layers
[UPDATE]: When either layer gains operations that belong on the combined handle
*/

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{BitfinexClient, CandleQuery, ClientConfig, HistoricalData};
use crate::types::{Candle, Trade};
use crate::ws::{BitfinexWebSocket, WsConfig};

/// Configuration for both halves of a [`Connector`]
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    pub rest: ClientConfig,
    pub ws: WsConfig,
}

/// Historical fetcher and streaming client behind one value.
#[derive(Debug)]
pub struct Connector {
    rest: BitfinexClient,
    stream: BitfinexWebSocket,
}

impl Connector {
    pub fn new() -> Result<Self> {
        Self::with_config(ConnectorConfig::default())
    }

    pub fn with_config(config: ConnectorConfig) -> Result<Self> {
        Ok(Self {
            rest: BitfinexClient::with_config(config.rest)?,
            stream: BitfinexWebSocket::with_config(config.ws)?,
        })
    }

    pub fn rest(&self) -> &BitfinexClient {
        &self.rest
    }

    /// Subscriptions and event callbacks live here.
    pub fn stream(&self) -> &BitfinexWebSocket {
        &self.stream
    }

    pub async fn close(&self) {
        self.stream.close().await;
    }
}

#[async_trait]
impl HistoricalData for Connector {
    async fn get_trades(&self, pair: &str, limit: u32) -> Result<Vec<Trade>> {
        self.rest.get_trades(pair, limit).await
    }

    async fn get_candles(
        &self,
        pair: &str,
        period_secs: i64,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>> {
        self.rest.get_candles(pair, period_secs, query).await
    }
}
