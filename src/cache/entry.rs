//! `CacheEntry`: an immutable value object whose lifecycle (fresh/stale/garbage) is a pure
//! function of wall-clock time.

use crate::bus::value::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An immutable cache value plus its lifecycle timestamps and tags.
///
/// Field names are shortened on the wire (`v`, `c`, `s`, `g`, `t`) to keep serialized entries
/// compact, matching how the teacher's invalidation messages use terse `#[serde(rename)]`
/// fields for wire efficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "v")]
    pub value: Value,
    #[serde(rename = "c")]
    pub created_at: u64,
    #[serde(rename = "s")]
    pub stale_at: u64,
    #[serde(rename = "g")]
    pub gc_at: u64,
    #[serde(rename = "t")]
    pub tags: Vec<String>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(value: Value, stale_time_ms: u64, gc_time_ms: u64, tags: Vec<String>) -> Self {
        let created_at = now_millis();
        Self {
            value,
            created_at,
            stale_at: created_at + stale_time_ms,
            gc_at: created_at + stale_time_ms.max(gc_time_ms),
            tags,
        }
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        now_millis() < self.stale_at
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        let now = now_millis();
        self.stale_at <= now && now < self.gc_at
    }

    #[must_use]
    pub fn is_garbage(&self) -> bool {
        now_millis() >= self.gc_at
    }

    /// True once the entry has lived through `ratio` of its fresh window.
    #[must_use]
    pub fn is_near_expiration(&self, ratio: f64) -> bool {
        if self.stale_at <= self.created_at {
            return true;
        }
        let age = now_millis().saturating_sub(self.created_at) as f64;
        let window = (self.stale_at - self.created_at) as f64;
        age >= ratio * window
    }

    /// Returns a copy of this entry with `stale_at` moved to "now minus one", so subsequent
    /// reads observe it as immediately stale without otherwise touching its data.
    #[must_use]
    pub fn expired(&self) -> Self {
        let mut copy = self.clone();
        copy.stale_at = now_millis().saturating_sub(1);
        copy
    }
}
