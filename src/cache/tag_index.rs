//! Bidirectional tag <-> key index for bulk invalidation by label.

use dashmap::DashMap;
use dashmap::DashSet;
use std::collections::HashSet;

/// Maintains `tag -> {keys}` and is driven entirely by `register`/`unregister` calls made
/// alongside the corresponding store writes/deletes — it never inspects the store itself.
#[derive(Default)]
pub struct TagIndex {
    tags_to_keys: DashMap<String, DashSet<String>>,
    keys_to_tags: DashMap<String, Vec<String>>,
}

impl TagIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current tag set for `key` with `tags`. A key's tags are exactly whatever
    /// its most recent `register` call specified.
    pub fn register(&self, key: &str, tags: &[String]) {
        self.unregister(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.tags_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.keys_to_tags.insert(key.to_string(), tags.to_vec());
    }

    /// Remove `key` from every tag's key-set, pruning tags that become empty.
    pub fn unregister(&self, key: &str) {
        let Some((_, previous_tags)) = self.keys_to_tags.remove(key) else {
            return;
        };
        for tag in previous_tags {
            if let Some(set) = self.tags_to_keys.get(&tag) {
                set.remove(key);
                if set.is_empty() {
                    drop(set);
                    self.tags_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Union of every key registered under any of `tags`, then unregister each returned key
    /// (the caller is responsible for deleting them from the actual store tiers).
    pub fn invalidate(&self, tags: &[String]) -> HashSet<String> {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(set) = self.tags_to_keys.get(tag) {
                keys.extend(set.iter().map(|k| k.clone()));
            }
        }
        for key in &keys {
            self.unregister(key);
        }
        keys
    }

    #[must_use]
    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.keys_to_tags.get(key).map(|t| t.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        self.tags_to_keys.clear();
        self.keys_to_tags.clear();
    }

    /// Unregister every key currently indexed under `prefix`. Used when a namespaced `clear`
    /// wipes a slice of the keyspace — the tag index must not keep pointing at keys that no
    /// longer exist in any tier.
    pub fn unregister_prefix(&self, prefix: &str) {
        let matching: Vec<String> = self
            .keys_to_tags
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in matching {
            self.unregister(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_unregisters_returned_keys() {
        let index = TagIndex::new();
        index.register("k1", &["a".into(), "b".into()]);
        index.register("k2", &["b".into()]);
        let invalidated = index.invalidate(&["b".into()]);
        assert_eq!(invalidated, HashSet::from(["k1".to_string(), "k2".to_string()]));
        assert!(index.tags_for("k1").is_empty());
        assert!(index.tags_for("k2").is_empty());
    }

    #[test]
    fn re_register_replaces_tags() {
        let index = TagIndex::new();
        index.register("k", &["a".into()]);
        index.register("k", &["b".into()]);
        assert_eq!(index.invalidate(&["a".into()]).len(), 0);
        assert_eq!(index.invalidate(&["b".into()]), HashSet::from(["k".to_string()]));
    }
}
