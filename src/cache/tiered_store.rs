//! `TieredStore`: L1 → L2₁ → L2₂ → ... lookup with per-layer circuit breakers, backfill on hit,
//! and tag-aware bulk invalidation.

use crate::cache::backends::{L1Store, L2Layer};
use crate::cache::circuit_breaker::CircuitBreaker;
use crate::cache::entry::CacheEntry;
use crate::cache::tag_index::TagIndex;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::warn;

/// Where a `get` was satisfied from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSource {
    L1,
    L2(&'static str),
}

#[derive(Debug, Clone)]
pub struct ReadResult {
    pub entry: CacheEntry,
    pub source: ReadSource,
    pub graced: bool,
}

struct L2Tier {
    layer: Arc<dyn L2Layer>,
    breaker: CircuitBreaker,
}

/// Shared state behind every namespaced handle — cloning a `TieredStore` (via `namespace`) is
/// cheap and shares L1, L2s, breakers and the tag index with the parent.
struct Shared {
    l1: Option<Arc<dyn L1Store>>,
    l2s: Vec<L2Tier>,
    tags: TagIndex,
}

#[derive(Clone)]
pub struct TieredStore {
    shared: Arc<Shared>,
    prefix: String,
}

impl TieredStore {
    #[must_use]
    pub fn new(l1: Option<Arc<dyn L1Store>>, l2s: Vec<Arc<dyn L2Layer>>) -> Self {
        let l2s = l2s
            .into_iter()
            .map(|layer| L2Tier { layer, breaker: CircuitBreaker::new(Default::default()) })
            .collect();
        Self {
            shared: Arc::new(Shared { l1, l2s, tags: TagIndex::new() }),
            prefix: String::new(),
        }
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{key}", self.prefix)
        }
    }

    /// The fully-namespaced key this store would read/write for `key`. Exposed so callers that
    /// share state keyed by plain strings across namespaces (e.g. the dedup map) can scope their
    /// own keys the same way the store scopes its own reads and writes.
    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        self.key(key)
    }

    /// A new handle sharing every tier and the tag index, but composing `prefix` onto the
    /// existing one (`"a:" + "b:" = "a:b:"`).
    #[must_use]
    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            prefix: format!("{}{prefix}:", self.prefix),
        }
    }

    /// This handle's fully-composed prefix (e.g. `"tenant-a:"`, or `""` for the root store).
    /// Exposed so callers that need to replicate this exact scope elsewhere — `DistributedSync`
    /// re-deriving a namespaced handle on the remote side of a `clear` — don't have to guess at
    /// how `namespace` composes it.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A handle sharing every tier and the tag index, scoped to exactly `prefix` rather than
    /// composing onto this handle's own prefix. Used to reconstruct a namespaced scope from a
    /// prefix string carried over the bus, where `namespace`'s composition would double it up.
    #[must_use]
    pub fn with_raw_prefix(&self, prefix: String) -> Self {
        Self { shared: Arc::clone(&self.shared), prefix }
    }

    pub async fn get(&self, key: &str) -> Option<ReadResult> {
        let full_key = self.key(key);

        if let Some(l1) = &self.shared.l1 {
            if let Some(entry) = l1.get(&full_key) {
                if !entry.is_garbage() {
                    let graced = entry.is_stale();
                    return Some(ReadResult { entry, source: ReadSource::L1, graced });
                }
            }
        }

        for (index, tier) in self.shared.l2s.iter().enumerate() {
            let found = tier
                .breaker
                .guarded_call(|| tier.layer.get(&full_key), None)
                .await;
            let Some(entry) = found else {
                continue;
            };
            if entry.is_garbage() {
                continue;
            }
            self.backfill(&full_key, &entry, index).await;
            let graced = entry.is_stale();
            return Some(ReadResult { entry, source: ReadSource::L2(tier.layer.name()), graced });
        }

        None
    }

    /// Pull every key from L1 first, then query only the still-pending keys against each L2 in
    /// turn (one batch of concurrent per-key lookups per layer).
    pub async fn get_many(&self, keys: &[String]) -> Vec<(String, Option<ReadResult>)> {
        let mut results: Vec<(String, Option<ReadResult>)> =
            keys.iter().map(|k| (k.clone(), None)).collect();
        let mut pending: Vec<usize> = (0..keys.len()).collect();

        if let Some(l1) = &self.shared.l1 {
            pending.retain(|&i| {
                let full_key = self.key(&keys[i]);
                match l1.get(&full_key) {
                    Some(entry) if !entry.is_garbage() => {
                        let graced = entry.is_stale();
                        results[i].1 = Some(ReadResult { entry, source: ReadSource::L1, graced });
                        false
                    }
                    _ => true,
                }
            });
        }

        for (index, tier) in self.shared.l2s.iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            let fetches = pending.iter().map(|&i| {
                let full_key = self.key(&keys[i]);
                async move {
                    let found = tier.breaker.guarded_call(|| tier.layer.get(&full_key), None).await;
                    (i, found)
                }
            });
            let fetched = join_all(fetches).await;
            let mut still_pending = Vec::new();
            for (i, found) in fetched {
                match found {
                    Some(entry) if !entry.is_garbage() => {
                        let full_key = self.key(&keys[i]);
                        self.backfill(&full_key, &entry, index).await;
                        let graced = entry.is_stale();
                        results[i].1 = Some(ReadResult {
                            entry,
                            source: ReadSource::L2(tier.layer.name()),
                            graced,
                        });
                    }
                    _ => still_pending.push(i),
                }
            }
            pending = still_pending;
        }

        results
    }

    /// Write `entry` to L1 (if present) and every L2 layer at index `< before_index` that is not
    /// currently open — the layers "closer" to the caller than the one that actually served the
    /// hit.
    async fn backfill(&self, full_key: &str, entry: &CacheEntry, before_index: usize) {
        if let Some(l1) = &self.shared.l1 {
            l1.set(full_key, entry.clone());
        }
        let writes = self.shared.l2s[..before_index].iter().map(|tier| async move {
            if tier.breaker.is_open() {
                return;
            }
            if let Err(err) = tier.layer.set(full_key, entry).await {
                warn!(layer = tier.layer.name(), error = %err, "backfill write failed");
                tier.breaker.record_failure();
            } else {
                tier.breaker.record_success();
            }
        });
        join_all(writes).await;
    }

    pub async fn set(&self, key: &str, entry: CacheEntry) {
        let full_key = self.key(key);
        self.shared.tags.register(&full_key, &entry.tags);

        if let Some(l1) = &self.shared.l1 {
            l1.set(&full_key, entry.clone());
        }

        let writes = self.shared.l2s.iter().map(|tier| {
            let entry = entry.clone();
            let full_key = full_key.clone();
            async move {
                tier.breaker
                    .guarded_call(
                        || async { tier.layer.set(&full_key, &entry).await },
                        (),
                    )
                    .await;
            }
        });
        join_all(writes).await;
    }

    /// Deletes `keys` from every tier in parallel. Returns the highest per-layer delete count
    /// observed (the most-informed layer's view of how many of these keys actually existed).
    pub async fn delete(&self, keys: &[String]) -> usize {
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        for full_key in &full_keys {
            self.shared.tags.unregister(full_key);
        }
        self.delete_full_keys(&full_keys).await
    }

    async fn delete_full_keys(&self, full_keys: &[String]) -> usize {
        let mut max_count = 0;
        if let Some(l1) = &self.shared.l1 {
            let count = full_keys.iter().filter(|k| l1.remove(k)).count();
            max_count = max_count.max(count);
        }

        let removals = self.shared.l2s.iter().map(|tier| async move {
            if tier.breaker.is_open() {
                return 0;
            }
            let mut count = 0;
            for full_key in full_keys {
                match tier.layer.remove(full_key).await {
                    Ok(()) => {
                        tier.breaker.record_success();
                        count += 1;
                    }
                    Err(err) => {
                        warn!(layer = tier.layer.name(), error = %err, "delete failed");
                        tier.breaker.record_failure();
                    }
                }
            }
            count
        });
        let counts = join_all(removals).await;
        max_count.max(counts.into_iter().max().unwrap_or(0))
    }

    /// `K = tagIndex.invalidate(tags)`, then delete every key in `K` from every tier.
    pub async fn invalidate_tags(&self, tags: &[String]) -> usize {
        let keys: Vec<String> = self.shared.tags.invalidate(tags).into_iter().collect();
        if keys.is_empty() {
            return 0;
        }
        self.delete_full_keys(&keys).await
    }

    /// L1-only: drop `keys` from the local tier without touching L2 or re-publishing. Used by
    /// `DistributedSync` applying a remote invalidation.
    pub fn invalidate_l1(&self, keys: &[String]) {
        if let Some(l1) = &self.shared.l1 {
            for key in keys {
                l1.remove(&self.key(key));
            }
        }
    }

    /// L1-only equivalent of `invalidate_tags`: looks up and unregisters this store's own tag
    /// index, then evicts only from the local L1 tier. Used by `DistributedSync` applying a
    /// remote tag invalidation, where L2 was already mutated by the origin instance.
    pub fn invalidate_tags_l1(&self, tags: &[String]) -> std::collections::HashSet<String> {
        let keys = self.shared.tags.invalidate(tags);
        if let Some(l1) = &self.shared.l1 {
            for key in &keys {
                l1.remove(key);
            }
        }
        keys
    }

    pub fn clear_l1(&self) {
        if let Some(l1) = &self.shared.l1 {
            l1.clear(&self.prefix);
        }
    }

    /// Clears this namespace from every tier (L1 and L2) and prunes the tag index of every key
    /// under this prefix. Unlike `clear_l1`, this is a local mutation that callers are expected
    /// to broadcast as an invalidation.
    pub async fn clear(&self) {
        self.clear_l1();
        self.shared.tags.unregister_prefix(&self.prefix);
        let clears = self.shared.l2s.iter().map(|tier| {
            let prefix = self.prefix.clone();
            async move {
                if let Err(err) = tier.layer.clear(&prefix).await {
                    warn!(layer = tier.layer.name(), error = %err, "clear failed");
                }
            }
        });
        join_all(clears).await;
    }
}
