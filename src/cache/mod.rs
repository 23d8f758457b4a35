//! Multi-tier cache: L1 (in-process) + L2 (shared) stores, tag-based bulk invalidation, a
//! two-state circuit breaker per L2 layer, single-flight + stale-while-revalidate loading, and
//! cross-instance synchronization over the bus.

pub mod backends;
pub mod circuit_breaker;
pub mod dedup;
pub mod distributed_sync;
pub mod entry;
pub mod internal_cache;
pub mod tag_index;
pub mod tiered_store;

pub use backends::{DashMapL1, L1Store, L2Layer};
#[cfg(feature = "redis")]
pub use backends::RedisL2;
#[cfg(feature = "backend-memcached")]
pub use backends::MemcachedL2;
#[cfg(feature = "moka")]
pub use backends::{MokaL1, MokaL1Config};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, Clock};
pub use dedup::Deduplicator;
pub use distributed_sync::DistributedSync;
pub use entry::CacheEntry;
pub use internal_cache::{CacheEvent, GetOrSetOptions, InternalCache, SetOptions};
pub use tag_index::TagIndex;
pub use tiered_store::TieredStore;
