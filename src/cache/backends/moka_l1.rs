//! `moka::sync::Cache`-backed in-process L1 store.
//!
//! Grounded in the teacher's `MokaCache` (`backends/moka_cache.rs`), which wrapped
//! `moka::future::Cache` for the old streaming-first API. `L1Store` forbids suspending calls, so
//! this backend uses `moka::sync::Cache` instead — same crate, same LRU/TTI eviction machinery,
//! just the synchronous half of it.

use super::L1Store;
use crate::cache::entry::CacheEntry;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct MokaL1Config {
    pub max_capacity: u64,
    pub time_to_idle: Duration,
}

impl Default for MokaL1Config {
    fn default() -> Self {
        Self { max_capacity: 10_000, time_to_idle: Duration::from_secs(300) }
    }
}

/// Bounded, LRU-evicting L1 store. Unlike `DashMapL1`, entries can be evicted under memory
/// pressure before their own `gc_at` — `get` still filters out `is_garbage` survivors the same
/// way.
#[derive(Debug)]
pub struct MokaL1 {
    cache: Cache<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl MokaL1 {
    #[must_use]
    pub fn new(config: MokaL1Config) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(config.time_to_idle)
            .build();
        Self { cache, hits: AtomicU64::new(0), misses: AtomicU64::new(0), sets: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl L1Store for MokaL1 {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key) {
            Some(entry) if entry.is_garbage() => {
                self.cache.invalidate(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        self.cache.insert(key.to_string(), entry);
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn remove(&self, key: &str) -> bool {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key);
        existed
    }

    fn clear(&self, prefix: &str) {
        if prefix.is_empty() {
            self.cache.invalidate_all();
            return;
        }
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_str().to_string())
            .collect();
        for key in matching {
            self.cache.invalidate(&key);
        }
    }

    fn name(&self) -> &'static str {
        "MokaL1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::value::Value;

    fn entry(v: i64) -> CacheEntry {
        CacheEntry::new(Value::Int(v), 60_000, 120_000, vec![])
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = MokaL1::new(MokaL1Config::default());
        store.set("k", entry(1));
        assert_eq!(store.get("k").map(|e| e.value), Some(Value::Int(1)));
        assert_eq!(store.hits(), 1);
    }

    #[test]
    fn clear_with_prefix_only_removes_matching_keys() {
        let store = MokaL1::new(MokaL1Config::default());
        store.set("ns:a", entry(1));
        store.set("other:b", entry(2));
        store.clear("ns:");
        assert!(store.get("ns:a").is_none());
        assert!(store.get("other:b").is_some());
    }

    #[test]
    fn garbage_entries_are_evicted_on_read() {
        let store = MokaL1::new(MokaL1Config::default());
        store.set("k", CacheEntry::new(Value::Int(1), 0, 0, vec![]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.get("k").is_none());
    }
}
