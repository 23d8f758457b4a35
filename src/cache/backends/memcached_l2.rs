//! Memcached-backed L2 layer. No TTL introspection and no pattern-scan, so `clear` only
//! supports the whole-store case — matching the backend's actual capabilities rather than
//! faking what it can't do.

use super::L2Layer;
use crate::cache::entry::CacheEntry;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct MemcachedL2 {
    client: Arc<memcache::Client>,
}

impl fmt::Debug for MemcachedL2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedL2").finish_non_exhaustive()
    }
}

impl MemcachedL2 {
    /// # Errors
    /// Returns an error if the client cannot connect.
    pub fn with_url(memcached_url: &str) -> Result<Self> {
        let client = memcache::connect(memcached_url)
            .map_err(|e| anyhow!("failed to connect to Memcached at {memcached_url}: {e}"))?;
        client
            .version()
            .map_err(|e| anyhow!("Memcached connection test failed: {e}"))?;
        Ok(Self { client: Arc::new(client) })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[async_trait]
impl L2Layer for MemcachedL2 {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        let client = self.client.clone();
        let raw = tokio::task::spawn_blocking(move || client.get::<String>(&key)).await??;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw)?;
        if entry.is_garbage() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let ttl_secs = entry.gc_at.saturating_sub(now_millis()).max(1000) / 1000;
        let key = key.to_string();
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            client
                .set(&key, json, ttl_secs as u32)
                .map_err(|e| anyhow!("Memcached SET failed: {e}"))
        })
        .await??;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            client
                .delete(&key)
                .map_err(|e| anyhow!("Memcached DELETE failed: {e}"))
        })
        .await??;
        Ok(())
    }

    /// Memcached exposes no pattern-based key scan, so a namespaced `clear` here is a no-op;
    /// only a full `flush_all` (empty prefix) is honored.
    async fn clear(&self, prefix: &str) -> Result<()> {
        if !prefix.is_empty() {
            return Ok(());
        }
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            client
                .flush()
                .map_err(|e| anyhow!("Memcached FLUSH failed: {e}"))
        })
        .await??;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MemcachedL2"
    }
}
