//! Cross-instance cache synchronization riding on a [`MessageBus`].
//!
//! Generalizes the teacher's `invalidation.rs` (`InvalidationMessage`, `InvalidationPublisher`,
//! `InvalidationSubscriber` over a single hardcoded Redis Pub/Sub channel) from that ad hoc
//! `{Remove, Update, RemovePattern, RemoveBulk}` enum to three fixed channels, each payload
//! tagged with the publishing store's logical name. A subscriber only applies a message whose
//! `store` name matches its own — the name identifies the logical store shared by every
//! process-local instance of it on the bus, not the individual process, so applying on a name
//! match (including a process's own publish looping back to itself) is what makes every
//! instance of that store converge.

use crate::bus::message_bus::{typed_handler, MessageBus};
use crate::cache::tiered_store::TieredStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Notified once per bus round trip so `InternalCache` can surface
/// `CacheEvent::BusPublished`/`BusReceived` without `DistributedSync` depending on
/// `InternalCache` itself (that would make the two modules own each other).
pub type SyncEventHook = Arc<dyn Fn(&'static str, bool) + Send + Sync>;

pub const INVALIDATE_CHANNEL: &str = "cache:invalidate";
pub const INVALIDATE_TAGS_CHANNEL: &str = "cache:invalidate:tags";
pub const CLEAR_CHANNEL: &str = "cache:clear";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidateMessage {
    store: String,
    keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidateTagsMessage {
    store: String,
    tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClearMessage {
    store: String,
    /// The namespace scope the clear applies to (empty for the root store). Lets a single
    /// `DistributedSync`, wired once against the root `TieredStore`, correctly scope a clear
    /// issued through a namespaced `InternalCache` handle instead of always wiping L1 entirely.
    #[serde(default)]
    prefix: String,
}

struct Shared {
    bus: MessageBus,
    store_name: String,
    store: TieredStore,
    event_hook: Mutex<Option<SyncEventHook>>,
}

/// Publishes local mutations to the bus under this store's name and applies remote mutations
/// from other instances of the same store to the local L1 tier only — L2 is already shared
/// infrastructure, so a remote instance's write already landed there.
#[derive(Clone)]
pub struct DistributedSync {
    shared: Arc<Shared>,
}

impl DistributedSync {
    /// Subscribes to all three channels immediately; `store_name` both tags outgoing messages
    /// and filters incoming ones so a store never invalidates itself in response to its own
    /// publish.
    ///
    /// # Errors
    /// Returns a [`crate::error::BusOperationError`] if any of the three subscribe calls fail.
    pub async fn new(
        bus: MessageBus,
        store_name: impl Into<String>,
        store: TieredStore,
    ) -> Result<Self, crate::error::BusOperationError> {
        let store_name = store_name.into();
        let shared = Arc::new(Shared {
            bus: bus.clone(),
            store_name: store_name.clone(),
            store,
            event_hook: Mutex::new(None),
        });
        let sync = Self { shared };

        let for_invalidate = sync.clone();
        bus.subscribe(
            INVALIDATE_CHANNEL,
            typed_handler(move |msg: InvalidateMessage| {
                let sync = for_invalidate.clone();
                async move {
                    sync.on_remote_invalidate(msg);
                    Ok(())
                }
            }),
        )
        .await?;

        let for_tags = sync.clone();
        bus.subscribe(
            INVALIDATE_TAGS_CHANNEL,
            typed_handler(move |msg: InvalidateTagsMessage| {
                let sync = for_tags.clone();
                async move {
                    sync.on_remote_invalidate_tags(msg);
                    Ok(())
                }
            }),
        )
        .await?;

        let for_clear = sync.clone();
        bus.subscribe(
            CLEAR_CHANNEL,
            typed_handler(move |msg: ClearMessage| {
                let sync = for_clear.clone();
                async move {
                    sync.on_remote_clear(msg);
                    Ok(())
                }
            }),
        )
        .await?;

        Ok(sync)
    }

    /// Registers the callback `InternalCache` uses to turn bus round trips into
    /// `CacheEvent::BusPublished`/`BusReceived`. Replaces any previously set hook.
    pub fn set_event_hook(&self, hook: SyncEventHook) {
        *self.shared.event_hook.lock() = Some(hook);
    }

    fn emit(&self, channel: &'static str, published: bool) {
        if let Some(hook) = self.shared.event_hook.lock().clone() {
            hook(channel, published);
        }
    }

    /// `true` when `origin` names this instance's own logical store — i.e. this is the same
    /// store reached through a different process, not some unrelated store sharing the bus.
    fn is_same_store(&self, origin: &str) -> bool {
        origin == self.shared.store_name
    }

    fn on_remote_invalidate(&self, msg: InvalidateMessage) {
        if !self.is_same_store(&msg.store) {
            return;
        }
        debug!(store = %msg.store, keys = msg.keys.len(), "applying remote invalidation");
        self.shared.store.invalidate_l1(&msg.keys);
        self.emit(INVALIDATE_CHANNEL, false);
    }

    fn on_remote_invalidate_tags(&self, msg: InvalidateTagsMessage) {
        if !self.is_same_store(&msg.store) {
            return;
        }
        debug!(store = %msg.store, tags = ?msg.tags, "applying remote tag invalidation");
        // L2 was already mutated by the origin instance; only this instance's own L1 +
        // tag index need to catch up.
        self.shared.store.invalidate_tags_l1(&msg.tags);
        self.emit(INVALIDATE_TAGS_CHANNEL, false);
    }

    fn on_remote_clear(&self, msg: ClearMessage) {
        if !self.is_same_store(&msg.store) {
            return;
        }
        debug!(store = %msg.store, prefix = %msg.prefix, "applying remote clear");
        self.shared.store.with_raw_prefix(msg.prefix).clear_l1();
        self.emit(CLEAR_CHANNEL, false);
    }

    pub async fn on_delete(&self, keys: &[String]) {
        let msg = InvalidateMessage { store: self.shared.store_name.clone(), keys: keys.to_vec() };
        match self.shared.bus.publish(INVALIDATE_CHANNEL, msg_to_value(&msg)).await {
            Ok(()) => self.emit(INVALIDATE_CHANNEL, true),
            Err(err) => warn!(error = %err, "failed to publish invalidation"),
        }
    }

    pub async fn on_invalidate_tags(&self, tags: &[String]) {
        let msg = InvalidateTagsMessage { store: self.shared.store_name.clone(), tags: tags.to_vec() };
        match self.shared.bus.publish(INVALIDATE_TAGS_CHANNEL, msg_to_value(&msg)).await {
            Ok(()) => self.emit(INVALIDATE_TAGS_CHANNEL, true),
            Err(err) => warn!(error = %err, "failed to publish tag invalidation"),
        }
    }

    /// `prefix` is the namespace scope of the `InternalCache` handle that issued the clear
    /// (empty for the root cache). Carried so a peer applies the clear to the matching slice of
    /// its own L1 instead of wiping it entirely.
    pub async fn on_clear(&self, prefix: &str) {
        let msg = ClearMessage { store: self.shared.store_name.clone(), prefix: prefix.to_string() };
        match self.shared.bus.publish(CLEAR_CHANNEL, msg_to_value(&msg)).await {
            Ok(()) => self.emit(CLEAR_CHANNEL, true),
            Err(err) => warn!(error = %err, "failed to publish clear"),
        }
    }
}

fn msg_to_value<T: Serialize>(msg: &T) -> crate::bus::value::Value {
    crate::bus::value::Value::from_serializable(msg)
        .expect("invalidation payloads are plain structs, never fail to encode")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::codecs::JsonCodec;
    use crate::bus::memory_transport::MemoryTransport;
    use crate::cache::backends::DashMapL1;
    use crate::cache::entry::CacheEntry;

    fn new_bus() -> MessageBus {
        let bus = MessageBus::new(Arc::new(MemoryTransport::new()), Arc::new(JsonCodec));
        bus
    }

    #[tokio::test]
    async fn remote_delete_evicts_every_instance_of_the_same_store() {
        let bus = new_bus();
        bus.connect().await.unwrap();

        let l1_a = Arc::new(DashMapL1::new());
        let store_a = TieredStore::new(Some(l1_a.clone()), vec![]);
        let sync_a = DistributedSync::new(bus.clone(), "default", store_a.clone()).await.unwrap();

        let l1_b = Arc::new(DashMapL1::new());
        let store_b = TieredStore::new(Some(l1_b.clone()), vec![]);
        let _sync_b = DistributedSync::new(bus.clone(), "default", store_b.clone()).await.unwrap();

        store_a.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;
        store_b.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;

        sync_a.on_delete(&["k".to_string()]).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(store_a.get("k").await.is_none(), "the publishing instance's own echo applies too");
        assert!(store_b.get("k").await.is_none(), "peer instance evicts on remote invalidation");
    }

    #[tokio::test]
    async fn a_differently_named_store_on_the_same_bus_is_unaffected() {
        let bus = new_bus();
        bus.connect().await.unwrap();

        let l1_a = Arc::new(DashMapL1::new());
        let store_a = TieredStore::new(Some(l1_a), vec![]);
        let sync_a = DistributedSync::new(bus.clone(), "orders", store_a.clone()).await.unwrap();

        let l1_b = Arc::new(DashMapL1::new());
        let store_b = TieredStore::new(Some(l1_b), vec![]);
        let _sync_b = DistributedSync::new(bus.clone(), "sessions", store_b.clone()).await.unwrap();

        store_b.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;
        sync_a.on_delete(&["k".to_string()]).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(store_b.get("k").await.is_some(), "a differently-named store ignores someone else's invalidation");
    }

    #[tokio::test]
    async fn remote_clear_propagates_to_every_instance() {
        let bus = new_bus();
        bus.connect().await.unwrap();

        let l1_a = Arc::new(DashMapL1::new());
        let store_a = TieredStore::new(Some(l1_a), vec![]);
        let sync_a = DistributedSync::new(bus.clone(), "default", store_a.clone()).await.unwrap();

        let l1_b = Arc::new(DashMapL1::new());
        let store_b = TieredStore::new(Some(l1_b), vec![]);
        let _sync_b = DistributedSync::new(bus.clone(), "default", store_b.clone()).await.unwrap();

        store_a.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;
        store_b.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;

        sync_a.on_clear("").await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(store_a.get("k").await.is_none());
        assert!(store_b.get("k").await.is_none());
    }

    #[tokio::test]
    async fn remote_clear_with_a_prefix_only_wipes_the_matching_namespace() {
        let bus = new_bus();
        bus.connect().await.unwrap();

        let l1_a = Arc::new(DashMapL1::new());
        let store_a = TieredStore::new(Some(l1_a), vec![]);
        let sync_a = DistributedSync::new(bus.clone(), "default", store_a.clone()).await.unwrap();

        let l1_b = Arc::new(DashMapL1::new());
        let store_b = TieredStore::new(Some(l1_b), vec![]);
        let _sync_b = DistributedSync::new(bus.clone(), "default", store_b.clone()).await.unwrap();

        let tenant = store_b.namespace("tenant-a");
        tenant.set("k", CacheEntry::new(crate::bus::value::Value::Int(1), 60_000, 120_000, vec![])).await;
        store_b.set("other", CacheEntry::new(crate::bus::value::Value::Int(2), 60_000, 120_000, vec![])).await;

        sync_a.on_clear("tenant-a:").await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(tenant.get("k").await.is_none(), "namespaced clear reaches the matching peer scope");
        assert!(store_b.get("other").await.is_some(), "keys outside the namespace survive");
    }
}
