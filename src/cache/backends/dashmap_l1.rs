//! `DashMap`-backed in-process L1 store.

use super::L1Store;
use crate::cache::entry::CacheEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Simple concurrent in-memory store. No eviction policy beyond what `CacheEntry::is_garbage`
/// already expresses — callers are expected to drop garbage entries on read, same as every
/// other tier.
#[derive(Debug, Default)]
pub struct DashMapL1 {
    map: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl DashMapL1 {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every entry whose `gc_at` has already passed. `DashMapL1` has no background
    /// eviction of its own, so callers that care about bounded memory should call this
    /// periodically.
    pub fn cleanup_garbage(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_garbage() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl L1Store for DashMapL1 {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.map.get(key) {
            Some(entry) if entry.is_garbage() => {
                drop(entry);
                self.map.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        self.map.insert(key.to_string(), entry);
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn remove(&self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    fn clear(&self, prefix: &str) {
        if prefix.is_empty() {
            self.map.clear();
        } else {
            self.map.retain(|k, _| !k.starts_with(prefix));
        }
    }

    fn name(&self) -> &'static str {
        "DashMapL1"
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
        let store = DashMapL1::new();
        store.set("k", entry(1));
        assert_eq!(store.get("k").map(|e| e.value), Some(Value::Int(1)));
        assert_eq!(store.hits(), 1);
    }

    #[test]
    fn miss_is_counted() {
        let store = DashMapL1::new();
        assert!(store.get("missing").is_none());
        assert_eq!(store.misses(), 1);
    }

    #[test]
    fn clear_with_prefix_only_removes_matching_keys() {
        let store = DashMapL1::new();
        store.set("ns:a", entry(1));
        store.set("ns:b", entry(2));
        store.set("other:c", entry(3));
        store.clear("ns:");
        assert!(store.get("ns:a").is_none());
        assert!(store.get("ns:b").is_none());
        assert!(store.get("other:c").is_some());
    }

    #[test]
    fn garbage_entries_are_evicted_on_read() {
        let store = DashMapL1::new();
        store.set("k", CacheEntry::new(Value::Int(1), 0, 0, vec![]));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 0);
    }
}
