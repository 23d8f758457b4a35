//! L1 (synchronous, in-process) and L2 (asynchronous, potentially remote) storage traits plus
//! concrete backends.

mod dashmap_l1;

#[cfg(feature = "redis")]
mod redis_l2;

#[cfg(feature = "moka")]
mod moka_l1;

#[cfg(feature = "backend-memcached")]
mod memcached_l2;

pub use dashmap_l1::DashMapL1;
#[cfg(feature = "moka")]
pub use moka_l1::{MokaL1, MokaL1Config};
#[cfg(feature = "backend-memcached")]
pub use memcached_l2::MemcachedL2;
#[cfg(feature = "redis")]
pub use redis_l2::RedisL2;

use crate::cache::entry::CacheEntry;
use async_trait::async_trait;
use std::fmt::Debug;

/// In-process, synchronous L1 store. Implementations must never suspend — callers hold no
/// executor guarantees around these calls, matching the "synchronous callbacks must not
/// suspend" requirement for the hot path.
pub trait L1Store: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn set(&self, key: &str, entry: CacheEntry);
    fn remove(&self, key: &str) -> bool;
    /// Remove every key starting with `prefix` (empty string clears everything). Namespaced
    /// stores pass their own prefix so clearing a namespace never touches sibling namespaces.
    fn clear(&self, prefix: &str);
    fn name(&self) -> &'static str;
}

/// Asynchronous, potentially remote L2 store.
#[async_trait]
pub trait L2Layer: Send + Sync + Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<CacheEntry>>;
    async fn set(&self, key: &str, entry: &CacheEntry) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
    /// Remove every key starting with `prefix` (empty string clears everything this layer
    /// knows about — backends without pattern-scan support may only implement the empty-prefix
    /// case).
    async fn clear(&self, prefix: &str) -> anyhow::Result<()>;
    fn name(&self) -> &'static str;
}
