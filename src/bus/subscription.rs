//! Per-channel handler bookkeeping.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A decoded message handler. Identity for duplicate suppression is `Arc::ptr_eq` — callers
/// that `subscribe` the same `Arc` clone twice get idempotent registration; a fresh closure
/// built per call is treated as a distinct handler (this is a deliberate consequence of Rust
/// closures having no stable identity, not a bug).
pub type Handler = Arc<
    dyn Fn(crate::bus::value::Value) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
struct ChannelSubscription {
    handlers: Vec<Handler>,
}

impl ChannelSubscription {
    fn add(&mut self, handler: Handler) -> bool {
        if self.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        self.handlers.push(handler);
        true
    }

    fn remove(&mut self, handler: &Handler) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        before != self.handlers.len()
    }
}

/// Indexes `channel -> ChannelSubscription`. A channel entry exists iff it has at least one
/// handler — `handler_count() == 0` implies the entry is absent.
#[derive(Default)]
pub struct SubscriptionManager {
    channels: DashMap<String, ChannelSubscription>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` to `channel`. Returns `true` if this was the first handler for the channel
    /// (the caller must then issue the transport-level subscribe) and `true` for "handler was
    /// newly added" via the second element.
    pub fn add_handler(&self, channel: &str, handler: Handler) -> (bool, bool) {
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        let was_empty = entry.handlers.is_empty();
        let added = entry.add(handler);
        (was_empty, added)
    }

    /// Remove `handler` from `channel`. Returns `true` if the channel now has zero handlers
    /// (the caller must then issue the transport-level unsubscribe and drop the entry).
    pub fn remove_handler(&self, channel: &str, handler: &Handler) -> bool {
        let mut now_empty = false;
        let mut remove_entry = false;
        if let Some(mut entry) = self.channels.get_mut(channel) {
            entry.remove(handler);
            now_empty = entry.handlers.is_empty();
            remove_entry = now_empty;
        }
        if remove_entry {
            self.channels.remove(channel);
        }
        now_empty
    }

    /// Drop every handler for `channel`, regardless of count.
    pub fn remove_channel(&self, channel: &str) {
        self.channels.remove(channel);
    }

    #[must_use]
    pub fn handlers(&self, channel: &str) -> Vec<Handler> {
        self.channels
            .get(channel)
            .map(|e| e.handlers.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> Handler {
        Arc::new(|_v| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn first_handler_reports_was_empty() {
        let mgr = SubscriptionManager::new();
        let h = noop_handler();
        let (was_empty, added) = mgr.add_handler("ch", Arc::clone(&h));
        assert!(was_empty);
        assert!(added);
        let (was_empty, added) = mgr.add_handler("ch", noop_handler());
        assert!(!was_empty);
        assert!(added);
    }

    #[test]
    fn duplicate_arc_is_a_noop() {
        let mgr = SubscriptionManager::new();
        let h = noop_handler();
        mgr.add_handler("ch", Arc::clone(&h));
        let (_, added) = mgr.add_handler("ch", Arc::clone(&h));
        assert!(!added);
        assert_eq!(mgr.handlers("ch").len(), 1);
    }

    #[test]
    fn channel_entry_disappears_at_zero_handlers() {
        let mgr = SubscriptionManager::new();
        let h = noop_handler();
        mgr.add_handler("ch", Arc::clone(&h));
        let now_empty = mgr.remove_handler("ch", &h);
        assert!(now_empty);
        assert!(!mgr.has_channel("ch"));
    }
}
