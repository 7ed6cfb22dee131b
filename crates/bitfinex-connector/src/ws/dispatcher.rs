/*
[INPUT]:  Decoded inbound frames from the read loop
[OUTPUT]: Registry activations and trade/candle events
[POS]:    WebSocket layer - frame classification and routing
[UPDATE]: When adding channel kinds or changing frame layouts
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::events::FeedEvents;
use super::message::{
    EventMessage, HEARTBEAT, InboundFrame, TRADE_EXECUTED, TRADE_UPDATED, decode_frame,
};
use super::registry::SubscriptionRegistry;
use crate::timeframe::{parse_candle_key, timeframe_to_seconds};
use crate::types::{CANDLE_ROW_LEN, Candle, FeedType, Side, SubscriptionKey, Trade};

const DROP_LOG_LIMIT: usize = 20;
const RAW_LOG_MAX_BYTES: usize = 512;

static DROP_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// What a single frame turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Ack bound a channel id to a pending subscription
    Activated(SubscriptionKey),
    /// Control frame accepted with nothing to do
    Ignored,
    Heartbeat,
    Trade(Side),
    /// Number of candles emitted (a snapshot may carry several)
    Candles(usize),
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not valid JSON, or neither an object nor an array
    Undecodable,
    /// Array frame with no recognised layout
    Unrecognized,
    /// No active subscription owns the channel id
    UnknownChannel(u64),
    /// Layout does not belong to the subscription's feed type
    FeedMismatch(FeedType),
    /// Recognised layout with invalid field values
    Malformed,
}

/// Array frame layouts after the channel id.
enum Shape<'a> {
    Heartbeat,
    TradeUpdate(&'a [Value]),
    CandleRow(&'a [Value]),
    Rows(&'a [Value]),
}

/// Routes decoded frames to the registry and event callbacks.
///
/// Never blocks on I/O and never panics on exchange data: every frame that
/// cannot be delivered is reported as [`DispatchOutcome::Dropped`].
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    events: Arc<FeedEvents>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, events: Arc<FeedEvents>) -> Self {
        Self { registry, events }
    }

    /// Drop every channel binding after the link carrying them ended.
    ///
    /// With `resubscribe` the subscriptions stay registered as pending and
    /// their keys are returned; otherwise they are forgotten.
    pub fn release_channels(&self, resubscribe: bool) -> Vec<SubscriptionKey> {
        if resubscribe {
            self.registry.reset_to_pending()
        } else {
            let dropped = self.registry.len();
            self.registry.clear();
            debug!(dropped, "ws subscriptions cleared");
            Vec::new()
        }
    }

    pub fn dispatch_text(&self, text: &str) -> DispatchOutcome {
        match decode_frame(text) {
            Ok(frame) => {
                let outcome = self.dispatch(frame);
                if let DispatchOutcome::Dropped(reason) = &outcome {
                    log_drop_sampled(reason, text);
                }
                outcome
            }
            Err(err) => {
                debug!(error = %err, bytes = text.len(), "ws frame undecodable");
                log_drop_sampled(&DropReason::Undecodable, text);
                DispatchOutcome::Dropped(DropReason::Undecodable)
            }
        }
    }

    pub fn dispatch(&self, frame: InboundFrame) -> DispatchOutcome {
        match frame {
            InboundFrame::Event(event) => self.handle_event(event),
            InboundFrame::Channel(items) => self.handle_channel(&items),
        }
    }

    fn handle_event(&self, event: EventMessage) -> DispatchOutcome {
        match event.event.as_str() {
            "subscribed" => self.handle_subscribed(&event),
            "error" => {
                warn!(
                    code = ?event.code,
                    msg = event.msg.as_deref().unwrap_or(""),
                    channel = event.channel.as_deref().unwrap_or(""),
                    symbol = event.symbol.as_deref().or(event.key.as_deref()).unwrap_or(""),
                    "ws exchange error event"
                );
                DispatchOutcome::Ignored
            }
            "info" => {
                info!(
                    code = ?event.code,
                    msg = event.msg.as_deref().unwrap_or(""),
                    "ws info event"
                );
                DispatchOutcome::Ignored
            }
            other => {
                debug!(event = other, chan_id = ?event.chan_id, "ws control event ignored");
                DispatchOutcome::Ignored
            }
        }
    }

    fn handle_subscribed(&self, event: &EventMessage) -> DispatchOutcome {
        let (Some(key), Some(chan_id)) = (ack_key(event), event.chan_id) else {
            warn!(
                channel = event.channel.as_deref().unwrap_or(""),
                chan_id = ?event.chan_id,
                "ws subscribed ack missing fields"
            );
            return DispatchOutcome::Ignored;
        };

        if self.registry.activate(&key, chan_id) {
            info!(chan_id, %key, "ws subscription active");
            DispatchOutcome::Activated(key)
        } else {
            DispatchOutcome::Ignored
        }
    }

    fn handle_channel(&self, items: &[Value]) -> DispatchOutcome {
        let Some(chan_id) = items.first().and_then(Value::as_u64) else {
            return DispatchOutcome::Dropped(DropReason::Unrecognized);
        };
        let Some(shape) = classify(items) else {
            return DispatchOutcome::Dropped(DropReason::Unrecognized);
        };
        if matches!(shape, Shape::Heartbeat) {
            return DispatchOutcome::Heartbeat;
        }

        let key = match self.registry.resolve(chan_id) {
            Ok(key) => key,
            Err(_) => return DispatchOutcome::Dropped(DropReason::UnknownChannel(chan_id)),
        };

        match (shape, &key) {
            (Shape::TradeUpdate(row), SubscriptionKey::Trades { symbol }) => {
                self.emit_trade(symbol, row)
            }
            (Shape::CandleRow(row), SubscriptionKey::Candles { symbol, .. }) => {
                self.emit_candles(symbol, std::iter::once(row))
            }
            (Shape::Rows(rows), SubscriptionKey::Candles { symbol, .. }) => {
                let rows = rows.iter().filter_map(|row| row.as_array().map(Vec::as_slice));
                self.emit_candles(symbol, rows)
            }
            (Shape::Rows(rows), SubscriptionKey::Trades { symbol }) => {
                // Backfill belongs to the REST fetcher; trade snapshots are not
                // replayed as live trades.
                debug!(chan_id, %symbol, rows = rows.len(), "ws trade snapshot skipped");
                DispatchOutcome::Dropped(DropReason::FeedMismatch(FeedType::Trades))
            }
            (_, key) => DispatchOutcome::Dropped(DropReason::FeedMismatch(key.feed_type())),
        }
    }

    fn emit_trade(&self, symbol: &str, row: &[Value]) -> DispatchOutcome {
        match Trade::from_row(symbol, row) {
            Ok(trade) => {
                let side = trade.side;
                match side {
                    Side::Buy => self.events.buy_trades.emit(&trade),
                    Side::Sell => self.events.sell_trades.emit(&trade),
                }
                DispatchOutcome::Trade(side)
            }
            Err(err) => {
                debug!(%symbol, error = %err, "ws trade row rejected");
                DispatchOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    fn emit_candles<'a>(
        &self,
        symbol: &str,
        rows: impl Iterator<Item = &'a [Value]>,
    ) -> DispatchOutcome {
        let mut emitted = 0;
        let mut rejected = 0;
        for row in rows {
            match Candle::from_row(symbol, row) {
                Ok(candle) => {
                    self.events.candles.emit(&candle);
                    emitted += 1;
                }
                Err(err) => {
                    rejected += 1;
                    debug!(%symbol, error = %err, "ws candle row rejected");
                }
            }
        }

        if emitted == 0 && rejected > 0 {
            DispatchOutcome::Dropped(DropReason::Malformed)
        } else {
            DispatchOutcome::Candles(emitted)
        }
    }
}

fn classify(items: &[Value]) -> Option<Shape<'_>> {
    match items.get(1)? {
        Value::String(tag) if tag == HEARTBEAT => Some(Shape::Heartbeat),
        Value::String(tag) if tag == TRADE_EXECUTED || tag == TRADE_UPDATED => {
            items.get(2)?.as_array().map(|row| Shape::TradeUpdate(row))
        }
        Value::Array(inner) if inner.is_empty() || inner.iter().all(Value::is_array) => {
            Some(Shape::Rows(inner))
        }
        Value::Array(inner)
            if inner.len() >= CANDLE_ROW_LEN
                && inner[..CANDLE_ROW_LEN].iter().all(Value::is_number) =>
        {
            Some(Shape::CandleRow(inner))
        }
        _ => None,
    }
}

/// Registry key an ack refers to.
///
/// Candle acks carry only the channel key, so symbol and timeframe are read
/// back out of it.
fn ack_key(event: &EventMessage) -> Option<SubscriptionKey> {
    match FeedType::from_channel(event.channel.as_deref()?)? {
        FeedType::Trades => event.symbol.as_deref().map(SubscriptionKey::trades),
        FeedType::Candles => {
            let (timeframe, symbol) = parse_candle_key(event.key.as_deref()?)?;
            timeframe_to_seconds(timeframe)?;
            Some(SubscriptionKey::candles(symbol, timeframe))
        }
    }
}

fn log_drop_sampled(reason: &DropReason, raw: &str) {
    let count = DROP_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= DROP_LOG_LIMIT {
        return;
    }
    let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
    warn!(
        sample_index = count + 1,
        sample_limit = DROP_LOG_LIMIT,
        reason = ?reason,
        bytes = raw.len(),
        message = %preview,
        "ws frame dropped"
    );
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscriptionStatus;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct Harness {
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Dispatcher,
        buys: Arc<Mutex<Vec<Trade>>>,
        sells: Arc<Mutex<Vec<Trade>>>,
        candles: Arc<Mutex<Vec<Candle>>>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SubscriptionRegistry::new());
        let events = Arc::new(FeedEvents::new());
        let buys = Arc::new(Mutex::new(Vec::new()));
        let sells = Arc::new(Mutex::new(Vec::new()));
        let candles = Arc::new(Mutex::new(Vec::new()));

        let sink = buys.clone();
        events.buy_trades.add(move |trade| sink.lock().unwrap().push(trade.clone()));
        let sink = sells.clone();
        events.sell_trades.add(move |trade| sink.lock().unwrap().push(trade.clone()));
        let sink = candles.clone();
        events.candles.add(move |candle| sink.lock().unwrap().push(candle.clone()));

        Harness {
            dispatcher: Dispatcher::new(registry.clone(), events),
            registry,
            buys,
            sells,
            candles,
        }
    }

    fn activate(h: &Harness, key: SubscriptionKey, chan_id: u64) {
        h.registry.register_pending(key.clone()).expect("register");
        assert!(h.registry.activate(&key, chan_id));
    }

    #[test]
    fn ack_activates_pending_trades_subscription() {
        let h = harness();
        let key = SubscriptionKey::trades("tBTCUSD");
        h.registry.register_pending(key.clone()).expect("register");

        let outcome = h.dispatcher.dispatch_text(
            r#"{"event":"subscribed","channel":"trades","chanId":7,"symbol":"tBTCUSD","pair":"BTCUSD"}"#,
        );

        assert_eq!(outcome, DispatchOutcome::Activated(key.clone()));
        assert_eq!(h.registry.resolve(7).expect("resolve"), key);
    }

    #[test]
    fn candle_ack_reads_key_field() {
        let h = harness();
        let key = SubscriptionKey::candles("tBTCUSD", "1h");
        h.registry.register_pending(key.clone()).expect("register");

        let outcome = h.dispatcher.dispatch_text(
            r#"{"event":"subscribed","channel":"candles","chanId":9,"key":"trade:1h:tBTCUSD"}"#,
        );

        assert_eq!(outcome, DispatchOutcome::Activated(key.clone()));
        let entry = h.registry.get(&key).expect("entry");
        assert_eq!(entry.status, SubscriptionStatus::Active);
        assert_eq!(entry.channel_id, Some(9));
    }

    #[test]
    fn other_events_are_ignored() {
        let h = harness();
        for text in [
            r#"{"event":"info","version":2}"#,
            r#"{"event":"error","msg":"subscribe: dup","code":10301}"#,
            r#"{"event":"unsubscribed","status":"OK","chanId":7}"#,
            r#"{"event":"conf","status":"OK"}"#,
            r#"{"event":"subscribed","channel":"trades","chanId":5,"symbol":"tNOPE"}"#,
        ] {
            assert_eq!(h.dispatcher.dispatch_text(text), DispatchOutcome::Ignored, "{text}");
        }
        assert!(h.registry.is_empty());
    }

    #[test]
    fn heartbeat_emits_nothing() {
        let h = harness();
        assert_eq!(h.dispatcher.dispatch_text(r#"[42,"hb"]"#), DispatchOutcome::Heartbeat);
        assert!(h.registry.is_empty());
        assert!(h.buys.lock().unwrap().is_empty());
        assert!(h.sells.lock().unwrap().is_empty());
        assert!(h.candles.lock().unwrap().is_empty());
    }

    #[test]
    fn sell_trade_update_emits_one_sell() {
        let h = harness();
        activate(&h, SubscriptionKey::trades("tBTCUSD"), 7);

        let outcome = h
            .dispatcher
            .dispatch_text(r#"[7,"te",[1001,1700000000000,-0.5,27350.25]]"#);

        assert_eq!(outcome, DispatchOutcome::Trade(Side::Sell));
        assert!(h.buys.lock().unwrap().is_empty());
        let sells = h.sells.lock().unwrap();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].id, "1001");
        assert_eq!(sells[0].pair, "tBTCUSD");
        assert_eq!(sells[0].amount, "0.5".parse::<Decimal>().expect("amount"));
        assert_eq!(sells[0].price, "27350.25".parse::<Decimal>().expect("price"));
    }

    #[test]
    fn buy_trade_update_uses_tu_tag() {
        let h = harness();
        activate(&h, SubscriptionKey::trades("tETHUSD"), 3);

        let outcome = h
            .dispatcher
            .dispatch_text(r#"[3,"tu",[55,1700000000123,2.5,1800.1]]"#);

        assert_eq!(outcome, DispatchOutcome::Trade(Side::Buy));
        let buys = h.buys.lock().unwrap();
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].amount, "2.5".parse::<Decimal>().expect("amount"));
        assert_eq!(buys[0].time.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn candle_update_emits_candle() {
        let h = harness();
        activate(&h, SubscriptionKey::candles("tBTCUSD", "1m"), 9);

        let outcome = h
            .dispatcher
            .dispatch_text(r#"[9,[1700000000000,100,105,110,95,1234.5]]"#);

        assert_eq!(outcome, DispatchOutcome::Candles(1));
        let candles = h.candles.lock().unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high_price, Decimal::from(110));
        assert_eq!(candles[0].low_price, Decimal::from(95));
        assert!(candles[0].high_price >= candles[0].low_price);
    }

    #[test]
    fn candle_snapshot_preserves_exchange_order() {
        let h = harness();
        activate(&h, SubscriptionKey::candles("tBTCUSD", "1m"), 9);

        let outcome = h.dispatcher.dispatch_text(
            r#"[9,[[1700000000000,1,2,3,1,10],[1700000060000,2,3,4,2,11],[1700000120000,3,4,5,3,12]]]"#,
        );

        assert_eq!(outcome, DispatchOutcome::Candles(3));
        let times: Vec<i64> = h
            .candles
            .lock()
            .unwrap()
            .iter()
            .map(|candle| candle.open_time.timestamp_millis())
            .collect();
        assert_eq!(times, vec![1_700_000_000_000, 1_700_000_060_000, 1_700_000_120_000]);
    }

    #[test]
    fn snapshot_skips_bad_rows() {
        let h = harness();
        activate(&h, SubscriptionKey::candles("tBTCUSD", "1m"), 9);

        let outcome = h
            .dispatcher
            .dispatch_text(r#"[9,[[1700000000000,1,2,3,1,10],[1,2],[1700000120000,3,4,1,3,12]]]"#);

        assert_eq!(outcome, DispatchOutcome::Candles(1));
    }

    #[test]
    fn unknown_channel_is_dropped() {
        let h = harness();
        let outcome = h
            .dispatcher
            .dispatch_text(r#"[77,"te",[1,1700000000000,1,100]]"#);
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownChannel(77)));
        assert!(h.buys.lock().unwrap().is_empty());
    }

    #[test]
    fn removed_subscription_stops_dispatch() {
        let h = harness();
        let key = SubscriptionKey::trades("tBTCUSD");
        activate(&h, key.clone(), 7);
        h.registry.remove(&key);

        let outcome = h
            .dispatcher
            .dispatch_text(r#"[7,"te",[1,1700000000000,1,100]]"#);
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownChannel(7)));
        assert!(h.buys.lock().unwrap().is_empty());
    }

    #[test]
    fn layout_must_match_feed_type() {
        let h = harness();
        activate(&h, SubscriptionKey::trades("tBTCUSD"), 7);
        activate(&h, SubscriptionKey::candles("tBTCUSD", "1m"), 9);

        assert_eq!(
            h.dispatcher.dispatch_text(r#"[7,[1700000000000,100,105,110,95,1]]"#),
            DispatchOutcome::Dropped(DropReason::FeedMismatch(FeedType::Trades))
        );
        assert_eq!(
            h.dispatcher.dispatch_text(r#"[9,"te",[1,1700000000000,1,100]]"#),
            DispatchOutcome::Dropped(DropReason::FeedMismatch(FeedType::Candles))
        );
        assert_eq!(
            h.dispatcher.dispatch_text(r#"[7,[[1,1700000000000,1,100],[2,1700000000001,-1,100]]]"#),
            DispatchOutcome::Dropped(DropReason::FeedMismatch(FeedType::Trades))
        );
        assert!(h.buys.lock().unwrap().is_empty());
        assert!(h.candles.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_frames_never_escape() {
        let h = harness();
        activate(&h, SubscriptionKey::trades("tBTCUSD"), 7);

        for text in [
            "",
            "garbage",
            "[]",
            "[7]",
            r#"["7","te",[1,2,3,4]]"#,
            r#"[7,"te"]"#,
            r#"[7,"te",[1,2]]"#,
            r#"[7,"te",[1,1700000000000,0,100]]"#,
            r#"[7,"xx",[1,1700000000000,1,100]]"#,
            r#"[7,[1,2,3]]"#,
            r#"[7,{"a":1}]"#,
            "null",
        ] {
            assert!(
                matches!(h.dispatcher.dispatch_text(text), DispatchOutcome::Dropped(_)),
                "{text}"
            );
        }
        assert!(h.buys.lock().unwrap().is_empty());
        assert!(h.sells.lock().unwrap().is_empty());
    }

    #[test]
    fn released_channels_stop_dispatch() {
        let h = harness();
        let key = SubscriptionKey::trades("tBTCUSD");
        activate(&h, key.clone(), 7);

        assert_eq!(h.dispatcher.release_channels(true), vec![key.clone()]);
        let entry = h.registry.get(&key).expect("still registered");
        assert_eq!(entry.status, SubscriptionStatus::Pending);
        assert_eq!(entry.channel_id, None);
        assert_eq!(
            h.dispatcher
                .dispatch_text(r#"[7,"te",[1,1700000000000,1,100]]"#),
            DispatchOutcome::Dropped(DropReason::UnknownChannel(7))
        );

        assert!(h.dispatcher.release_channels(false).is_empty());
        assert!(h.registry.is_empty());
        assert!(h.buys.lock().unwrap().is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "ééééé";
        let out = truncate_for_log(text, 3);
        assert_eq!(out, "é...");
    }
}
