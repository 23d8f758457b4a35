//! Stale-while-revalidate scenario: a stale hit returns immediately while a background
//! revalidation refreshes the entry for the next caller.

use cachebus::bus::Value;
use cachebus::cache::{DashMapL1, GetOrSetOptions, InternalCache, SetOptions, TieredStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn new_cache() -> InternalCache {
    let store = TieredStore::new(Some(Arc::new(DashMapL1::new())), vec![]);
    InternalCache::new(store, None)
}

#[tokio::test]
async fn stale_hit_returns_immediately_and_refreshes_in_background() {
    let cache = new_cache();
    cache
        .set(
            "k",
            Value::String("v1".to_string()),
            SetOptions { stale_time: Duration::from_millis(50), gc_time: Duration::from_secs(10), tags: vec![] },
        )
        .await;

    tokio::time::sleep(Duration::from_millis(60)).await;

    let loader_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&loader_calls);
    let result = cache
        .get_or_set(
            "k",
            move |_token| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::String("v2".to_string()))
                }
            },
            GetOrSetOptions {
                // The refreshed entry needs a window long enough to still read as fresh after
                // the assertion's own wait below — the *original* v1 entry is what must be
                // stale at 60ms, not the one this call's background refresh writes.
                stale_time: Duration::from_millis(500),
                gc_time: Duration::from_secs(10),
                timeout: Some(Duration::ZERO),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result, Value::String("v1".to_string()));

    // Give the background refresh time to land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let refreshed = cache
        .get_or_set(
            "k",
            |_token| async move {
                panic!("loader must not run: the entry should already be fresh");
                #[allow(unreachable_code)]
                Ok(Value::Null)
            },
            GetOrSetOptions {
                stale_time: Duration::from_millis(500),
                gc_time: Duration::from_secs(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(refreshed, Value::String("v2".to_string()));
    assert_eq!(loader_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_misses_on_the_same_key_run_the_loader_once() {
    let cache = new_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let run = |cache: InternalCache, calls: Arc<AtomicUsize>| async move {
        cache
            .get_or_set(
                "k",
                move |_token| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Value::Int(42))
                    }
                },
                GetOrSetOptions::default(),
            )
            .await
    };

    let (a, b) = tokio::join!(run(cache.clone(), Arc::clone(&calls)), run(cache.clone(), Arc::clone(&calls)));
    assert_eq!(a.unwrap(), Value::Int(42));
    assert_eq!(b.unwrap(), Value::Int(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
