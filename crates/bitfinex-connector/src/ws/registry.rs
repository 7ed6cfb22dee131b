/*
[INPUT]:  Subscribe/unsubscribe calls from the public API, acks from the read loop
[OUTPUT]: Consistent key <-> channel id mapping for dispatch
[POS]:    WebSocket layer - subscription bookkeeping shared by callers and the read loop
[UPDATE]: When subscription lifecycle or lookup rules change
*/

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};
use crate::types::{Subscription, SubscriptionKey, SubscriptionStatus};

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<SubscriptionKey, Subscription>,
    channels: HashMap<u64, SubscriptionKey>,
}

/// Forward and reverse subscription maps behind a single lock, so no reader
/// ever observes one map updated without the other.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Critical sections never panic mid-update, so a poisoned lock still holds consistent maps.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a subscribe request that is waiting for its ack.
    pub fn register_pending(&self, key: SubscriptionKey) -> Result<()> {
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return Err(ConnectorError::AlreadySubscribed { key });
        }
        debug!(%key, "subscription pending");
        state.entries.insert(key.clone(), Subscription::pending(key));
        Ok(())
    }

    /// Bind a channel id to a pending subscription.
    ///
    /// Returns `false` for acks that match no pending entry (stale, duplicate,
    /// or for a subscription removed before its ack arrived).
    pub fn activate(&self, key: &SubscriptionKey, chan_id: u64) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(owner) = state.channels.get(&chan_id) {
            warn!(chan_id, %owner, %key, "ack for channel id already bound; ignoring");
            return false;
        }

        let Some(entry) = state.entries.get_mut(key) else {
            debug!(chan_id, %key, "ack for unknown subscription; ignoring");
            return false;
        };
        if entry.status != SubscriptionStatus::Pending {
            debug!(chan_id, %key, bound = ?entry.channel_id, "duplicate ack; ignoring");
            return false;
        }

        entry.status = SubscriptionStatus::Active;
        entry.channel_id = Some(chan_id);
        state.channels.insert(chan_id, key.clone());
        debug!(chan_id, %key, "subscription active");
        true
    }

    /// Key owning an active channel id.
    pub fn resolve(&self, chan_id: u64) -> Result<SubscriptionKey> {
        self.lock()
            .channels
            .get(&chan_id)
            .cloned()
            .ok_or(ConnectorError::UnknownChannel { chan_id })
    }

    /// Drop a subscription and its channel binding. Absent keys are a no-op.
    pub fn remove(&self, key: &SubscriptionKey) -> Option<Subscription> {
        let mut state = self.lock();
        let removed = state.entries.remove(key)?;
        if let Some(chan_id) = removed.channel_id {
            state.channels.remove(&chan_id);
        }
        debug!(%key, chan_id = ?removed.channel_id, "subscription removed");
        Some(removed)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.lock().entries.get(key).cloned()
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Return every entry to pending and forget all channel ids.
    ///
    /// Channel ids are per-connection, so this runs whenever the link is lost;
    /// the returned keys are the ones to subscribe again on the next link.
    pub fn reset_to_pending(&self) -> Vec<SubscriptionKey> {
        let mut state = self.lock();
        state.channels.clear();
        state
            .entries
            .values_mut()
            .map(|entry| {
                entry.status = SubscriptionStatus::Pending;
                entry.channel_id = None;
                entry.key.clone()
            })
            .collect()
    }

    /// Drop the given keys if they are still waiting for an ack. Entries
    /// activated or re-registered since are kept. Returns how many went.
    pub fn remove_pending(&self, keys: &[SubscriptionKey]) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        for key in keys {
            if state
                .entries
                .get(key)
                .is_some_and(|entry| entry.status == SubscriptionStatus::Pending)
            {
                state.entries.remove(key);
            }
        }
        before - state.entries.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.channels.clear();
    }
}
