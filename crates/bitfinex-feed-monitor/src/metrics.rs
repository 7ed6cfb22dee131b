/*
[INPUT]:  Trades and candles delivered by the streaming client
[OUTPUT]: Per-symbol counters and last prices for periodic reporting
[POS]:    Shared runtime metrics between event callbacks and the monitor loop
[UPDATE]: When adding/removing per-feed runtime signals
*/

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use bitfinex_connector::{Candle, Side, Trade};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStatsSnapshot {
    pub buy_trades: u64,
    pub sell_trades: u64,
    pub candles: u64,
    pub last_trade_price: Option<Decimal>,
    pub last_close: Option<Decimal>,
    pub last_update: Option<Instant>,
}

/// Written from the read loop, read by the reporting loop.
#[derive(Debug, Default)]
pub struct FeedStats {
    symbols: Mutex<HashMap<String, FeedStatsSnapshot>>,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_trade(&self, trade: &Trade) {
        self.update(&trade.pair, |stats| {
            match trade.side {
                Side::Buy => stats.buy_trades += 1,
                Side::Sell => stats.sell_trades += 1,
            }
            stats.last_trade_price = Some(trade.price);
        });
    }

    pub fn record_candle(&self, candle: &Candle) {
        self.update(&candle.pair, |stats| {
            stats.candles += 1;
            stats.last_close = Some(candle.close_price);
        });
    }

    pub fn snapshot(&self, symbol: &str) -> Option<FeedStatsSnapshot> {
        self.symbols
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    /// Every symbol seen so far, sorted by symbol.
    pub fn snapshot_all(&self) -> Vec<(String, FeedStatsSnapshot)> {
        let mut all: Vec<_> = self
            .symbols
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(symbol, stats)| (symbol.clone(), stats.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn update(&self, symbol: &str, apply: impl FnOnce(&mut FeedStatsSnapshot)) {
        let mut symbols = self.symbols.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = symbols.entry(symbol.to_string()).or_default();
        apply(stats);
        stats.last_update = Some(Instant::now());
    }
}
