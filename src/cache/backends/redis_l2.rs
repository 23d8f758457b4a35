//! Redis-backed L2 layer. Uses `ConnectionManager` for automatic reconnection, matching the
//! teacher's default warm-tier backend.

use super::L2Layer;
use crate::cache::entry::CacheEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct RedisL2 {
    conn_manager: ConnectionManager,
}

impl fmt::Debug for RedisL2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisL2").finish_non_exhaustive()
    }
}

impl RedisL2 {
    /// # Errors
    /// Returns an error if the client cannot be built or the initial connection fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("failed to create Redis client for {redis_url}"))?;
        Self::with_client(client).await
    }

    /// # Errors
    /// Returns an error if the connection manager cannot be established.
    pub async fn with_client(client: Client) -> Result<Self> {
        let conn_manager = ConnectionManager::new(client)
            .await
            .context("failed to establish Redis connection manager for L2 layer")?;
        Ok(Self { conn_manager })
    }

    /// Glob-style key scan via the non-blocking cursor-based `SCAN` command.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            keys.extend(batch);
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl L2Layer for RedisL2 {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn_manager.clone();
        let bytes: Option<Vec<u8>> = conn.get(key).await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt cache entry at Redis key {key}"))?;
        if entry.is_garbage() {
            let _: () = conn.del(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let bytes = serde_json::to_vec(entry).context("failed to serialize cache entry")?;
        let remaining_ms = entry.gc_at.saturating_sub(now_millis());
        let ttl = Duration::from_millis(remaining_ms).max(Duration::from_secs(1));
        let _: () = conn.set_ex(key, bytes, ttl.as_secs()).await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "set L2 entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        let pattern = if prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{prefix}*")
        };
        let keys = self.scan_keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let _: usize = conn.del(keys).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RedisL2"
    }
}
