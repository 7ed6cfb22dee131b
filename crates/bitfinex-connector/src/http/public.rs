/*
[INPUT]:  Pair symbols, candle periods and history bounds
[OUTPUT]: Historical trades and candles
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};
use crate::http::BitfinexClient;
use crate::timeframe::{candle_key, seconds_to_timeframe};
use crate::types::{Candle, Trade};

/// Bounds for a candle history request. Unset fields are left to the exchange defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandleQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl CandleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("start", start.timestamp_millis().to_string()));
        }
        if let Some(end) = self.end {
            params.push(("end", end.timestamp_millis().to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

/// Request/response access to feed history.
#[async_trait]
pub trait HistoricalData: Send + Sync {
    /// Most recent trades for `pair`, newest first.
    async fn get_trades(&self, pair: &str, limit: u32) -> Result<Vec<Trade>>;

    /// Candles of `period_secs` for `pair` within `query`, in exchange order.
    async fn get_candles(&self, pair: &str, period_secs: i64, query: &CandleQuery)
    -> Result<Vec<Candle>>;
}

impl BitfinexClient {
    /// GET trades/{pair}/hist?limit={limit}
    pub async fn get_trades(&self, pair: &str, limit: u32) -> Result<Vec<Trade>> {
        let endpoint = format!("trades/{pair}/hist");
        let builder = self
            .request(Method::GET, &endpoint)?
            .query(&[("limit", limit)]);
        let rows: Vec<Value> = self.send_json(builder).await?;
        Ok(parse_rows(&rows, pair, Trade::from_row))
    }

    /// GET candles/trade:{tf}:{pair}/hist?start&end&limit
    pub async fn get_candles(
        &self,
        pair: &str,
        period_secs: i64,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>> {
        let timeframe = seconds_to_timeframe(period_secs)?;
        if let (Some(start), Some(end)) = (query.start, query.end)
            && start > end
        {
            return Err(ConnectorError::Config(format!(
                "candle query start {start} is after end {end}"
            )));
        }

        let endpoint = format!("candles/{}/hist", candle_key(timeframe, pair));
        let builder = self
            .request(Method::GET, &endpoint)?
            .query(&query.to_params());
        let rows: Vec<Value> = self.send_json(builder).await?;
        Ok(parse_rows(&rows, pair, Candle::from_row))
    }
}

#[async_trait]
impl HistoricalData for BitfinexClient {
    async fn get_trades(&self, pair: &str, limit: u32) -> Result<Vec<Trade>> {
        BitfinexClient::get_trades(self, pair, limit).await
    }

    async fn get_candles(
        &self,
        pair: &str,
        period_secs: i64,
        query: &CandleQuery,
    ) -> Result<Vec<Candle>> {
        BitfinexClient::get_candles(self, pair, period_secs, query).await
    }
}

/// Parse every row, skipping (and logging) the ones that do not fit the layout.
fn parse_rows<T>(rows: &[Value], pair: &str, parse: fn(&str, &[Value]) -> Result<T>) -> Vec<T> {
    let mut parsed = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for row in rows {
        let result = match row.as_array() {
            Some(fields) => parse(pair, fields),
            None => Err(ConnectorError::MalformedFrame(format!(
                "history row is not an array: {row}"
            ))),
        };
        match result {
            Ok(item) => parsed.push(item),
            Err(err) => {
                skipped += 1;
                if skipped == 1 {
                    warn!(pair, error = %err, "skipping malformed history row");
                }
            }
        }
    }
    if skipped > 0 {
        debug!(pair, skipped, kept = parsed.len(), "history rows skipped");
    }
    parsed
}
