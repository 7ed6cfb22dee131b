/*
[INPUT]:  HTTP client configuration and API endpoints
[OUTPUT]: Historical trades and candles as domain types
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod public;

pub use client::{BitfinexClient, ClientConfig, DEFAULT_REST_URL};
pub use public::{CandleQuery, HistoricalData};
