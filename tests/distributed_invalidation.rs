//! Scenario 6: two `InternalCache`s wired through the same in-memory `MessageBus`, sharing a
//! store name — a delete on one propagates to the other's L1 via `DistributedSync`.

use cachebus::bus::codecs::JsonCodec;
use cachebus::bus::memory_transport::MemoryTransport;
use cachebus::bus::{MessageBus, Value};
use cachebus::cache::{CacheEvent, DashMapL1, DistributedSync, InternalCache, SetOptions, TieredStore};
use std::sync::Arc;
use std::time::Duration;

async fn wired_cache(bus: &MessageBus) -> InternalCache {
    let store = TieredStore::new(Some(Arc::new(DashMapL1::new())), vec![]);
    let sync = DistributedSync::new(bus.clone(), "default", store.clone()).await.unwrap();
    InternalCache::new(store, Some(sync))
}

#[tokio::test]
async fn delete_on_one_instance_evicts_the_others_l1() {
    let bus = MessageBus::new(Arc::new(MemoryTransport::new()), Arc::new(JsonCodec));
    bus.connect().await.unwrap();

    let cache_a = wired_cache(&bus).await;
    let cache_b = wired_cache(&bus).await;

    let mut events_b = cache_b.subscribe_events();

    cache_a.set("k", Value::String("v".to_string()), SetOptions::default()).await;
    cache_b.set("k", Value::String("vB".to_string()), SetOptions::default()).await;

    assert_eq!(cache_a.get("k").await, Some(Value::String("v".to_string())));
    assert_eq!(cache_b.get("k").await, Some(Value::String("vB".to_string())));

    cache_a.delete(&["k".to_string()]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cache_a.get("k").await, None);
    assert_eq!(cache_b.get("k").await, None, "peer's L1 was evicted by the remote invalidation");

    // cache_b's own CacheEvent::Miss proves the bus delivery actually reached it and its
    // get() went to an empty L1 rather than coincidentally never having had the key.
    let mut saw_miss = false;
    while let Ok(event) = events_b.try_recv() {
        if matches!(event, CacheEvent::Miss { key } if key == "k") {
            saw_miss = true;
        }
    }
    assert!(saw_miss);
}

#[tokio::test]
async fn invalidate_tags_propagates_across_instances() {
    let bus = MessageBus::new(Arc::new(MemoryTransport::new()), Arc::new(JsonCodec));
    bus.connect().await.unwrap();

    let cache_a = wired_cache(&bus).await;
    let cache_b = wired_cache(&bus).await;

    cache_a
        .set("k", Value::Int(1), SetOptions { tags: vec!["group".into()], ..Default::default() })
        .await;
    cache_b
        .set("k", Value::Int(1), SetOptions { tags: vec!["group".into()], ..Default::default() })
        .await;

    cache_a.invalidate_tags(&["group".to_string()]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cache_a.get("k").await, None);
    assert_eq!(cache_b.get("k").await, None);
}

#[tokio::test]
async fn clear_propagates_across_instances() {
    let bus = MessageBus::new(Arc::new(MemoryTransport::new()), Arc::new(JsonCodec));
    bus.connect().await.unwrap();

    let cache_a = wired_cache(&bus).await;
    let cache_b = wired_cache(&bus).await;

    cache_a.set("k", Value::Int(1), SetOptions::default()).await;
    cache_b.set("k", Value::Int(1), SetOptions::default()).await;

    cache_a.clear().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(cache_a.get("k").await, None);
    assert_eq!(cache_b.get("k").await, None);
}
