//! cachebus
//!
//! A distributed pub/sub message bus paired with a multi-tier cache, sharing one crate so the
//! cache's cross-instance invalidation can ride over the bus instead of hardcoding its own
//! transport.
//!
//! - [`bus`]: typed, codec-agnostic pub/sub over pluggable transports (in-memory, Redis), with a
//!   middleware chain for compression, integrity, and retry-with-dead-lettering.
//! - [`cache`]: an L1 (sync, in-process) + L2 (async, shared) tiered store with per-layer circuit
//!   breakers, tag-based bulk invalidation, single-flight request coalescing, stale-while-
//!   revalidate reads, and [`cache::DistributedSync`] for propagating invalidations to peers over
//!   a [`bus::MessageBus`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cachebus::bus::{MessageBus, codecs::JsonCodec};
//! use cachebus::bus::memory_transport::MemoryTransport;
//! use cachebus::cache::{DashMapL1, InternalCache, TieredStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bus = MessageBus::new(Arc::new(MemoryTransport::new()), Arc::new(JsonCodec));
//!     bus.connect().await?;
//!
//!     let store = TieredStore::new(Some(Arc::new(DashMapL1::new())), vec![]);
//!     let cache = InternalCache::new(store, None);
//!
//!     cache
//!         .set("user:1", cachebus::bus::Value::String("alice".into()), Default::default())
//!         .await;
//!     assert_eq!(cache.get("user:1").await, Some(cachebus::bus::Value::String("alice".into())));
//!
//!     Ok(())
//! }
//! ```
//!
//! There is deliberately no top-level builder/factory type here: every component takes a plain
//! constructor and a `Default`-backed config struct (`RetryQueueConfig`, `CircuitBreakerConfig`,
//! `SetOptions`, `GetOrSetOptions`, ...) so wiring a bus and a cache together is ordinary
//! application code, not a façade this crate owns.

pub mod bus;
pub mod cache;
pub mod error;
