/*
[INPUT]:  Callback registrations from callers, parsed entities from the dispatcher
[OUTPUT]: Multicast delivery of trades and candles to registered callbacks
[POS]:    WebSocket layer - event surface of the streaming client
[UPDATE]: When adding event kinds or changing delivery semantics
*/

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::types::{Candle, Trade};

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Token returned by a callback registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks for one event kind.
pub struct EventHandlers<T> {
    handlers: Mutex<Vec<(HandlerId, Callback<T>)>>,
}

impl<T> EventHandlers<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId::next();
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order.
    ///
    /// Callbacks run outside the lock so they may add or remove handlers. A
    /// panicking callback is contained and does not stop delivery to the rest.
    pub fn emit(&self, value: &T) {
        let handlers: Vec<(HandlerId, Callback<T>)> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (id, callback) in handlers {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!(handler = id.0, "event handler panicked");
            }
        }
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T> Default for EventHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventHandlers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("len", &self.len())
            .finish()
    }
}

/// The three event streams of the streaming client.
#[derive(Debug, Default)]
pub struct FeedEvents {
    pub buy_trades: EventHandlers<Trade>,
    pub sell_trades: EventHandlers<Trade>,
    pub candles: EventHandlers<Candle>,
}

impl FeedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a handler from whichever stream it was registered on.
    pub fn remove(&self, id: HandlerId) -> bool {
        self.buy_trades.remove(id) || self.sell_trades.remove(id) || self.candles.remove(id)
    }

    pub fn clear(&self) {
        self.buy_trades.clear();
        self.sell_trades.clear();
        self.candles.clear();
    }
}
