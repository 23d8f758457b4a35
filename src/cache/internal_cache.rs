//! `InternalCache`: orchestrates `TieredStore` + `Deduplicator` + loader invocation + event
//! emission + distributed sync hooks. The public façade of the cache half of this crate.

use crate::bus::value::Value;
use crate::cache::dedup::{with_swr, DEFAULT_REVALIDATE_WINDOW_MS};
use crate::cache::dedup::Deduplicator;
use crate::cache::distributed_sync::DistributedSync;
use crate::cache::entry::CacheEntry;
use crate::cache::tiered_store::TieredStore;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Observability hooks a telemetry sink would consume — this crate only emits them.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Hit { key: String, driver: &'static str, graced: bool },
    Miss { key: String },
    Set { key: String },
    Delete { key: String },
    Clear,
    Error { key: String, message: String },
    BusPublished { channel: String },
    BusReceived { channel: String },
}

#[derive(Debug, Clone)]
pub struct SetOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub tags: Vec<String>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { stale_time: Duration::from_secs(60), gc_time: Duration::from_secs(300), tags: vec![] }
    }
}

#[derive(Debug, Clone)]
pub struct GetOrSetOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub tags: Vec<String>,
    /// If set, bypass the cache entirely and always (deduped) reload.
    pub fresh: bool,
    /// Kick off a background refresh once an entry has lived through this fraction of its
    /// fresh window. `None` disables eager refresh.
    pub eager_refresh: Option<f64>,
    /// Timeout for the SWR race when an existing entry is stale. `None` means no race — a stale
    /// hit is returned immediately without ever awaiting the loader inline.
    pub timeout: Option<Duration>,
    pub abort_on_timeout: bool,
    /// Extra attempts on top of the first, each delayed `100 * 2^attempt` ms.
    pub retries: u32,
}

impl Default for GetOrSetOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(60),
            gc_time: Duration::from_secs(300),
            tags: vec![],
            fresh: false,
            eager_refresh: None,
            timeout: None,
            abort_on_timeout: false,
            retries: 0,
        }
    }
}

struct Shared {
    store: TieredStore,
    dedup: Deduplicator,
    events: broadcast::Sender<CacheEvent>,
    sync: Option<DistributedSync>,
}

#[derive(Clone)]
pub struct InternalCache {
    shared: Arc<Shared>,
}

impl InternalCache {
    #[must_use]
    pub fn new(store: TieredStore, sync: Option<DistributedSync>) -> Self {
        let (events, _) = broadcast::channel(1024);
        if let Some(sync) = &sync {
            let events = events.clone();
            sync.set_event_hook(Arc::new(move |channel: &'static str, published: bool| {
                let event = if published {
                    CacheEvent::BusPublished { channel: channel.to_string() }
                } else {
                    CacheEvent::BusReceived { channel: channel.to_string() }
                };
                let _ = events.send(event);
            }));
        }
        Self { shared: Arc::new(Shared { store, dedup: Deduplicator::new(), events, sync }) }
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.shared.events.send(event);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.shared.store.get(key).await {
            Some(result) => {
                self.emit(CacheEvent::Hit {
                    key: key.to_string(),
                    driver: match result.source {
                        crate::cache::tiered_store::ReadSource::L1 => "L1",
                        crate::cache::tiered_store::ReadSource::L2(name) => name,
                    },
                    graced: result.graced,
                });
                Some(result.entry.value)
            }
            None => {
                self.emit(CacheEvent::Miss { key: key.to_string() });
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, options: SetOptions) {
        let entry = CacheEntry::new(
            value,
            options.stale_time.as_millis() as u64,
            options.gc_time.as_millis() as u64,
            options.tags,
        );
        self.shared.store.set(key, entry).await;
        self.emit(CacheEvent::Set { key: key.to_string() });
    }

    async fn load_with_retries(
        &self,
        key: String,
        retries: u32,
        token: CancellationToken,
        loader: Arc<dyn Fn(CancellationToken) -> futures_util::future::BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>,
    ) -> anyhow::Result<Value> {
        let mut attempt = 0;
        loop {
            match loader(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(100 * 2u64.saturating_pow(attempt));
                    debug!(key, attempt, error = %err, "loader failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(CacheError::loader_error(err).with_context(key.clone()).into());
                }
            }
        }
    }

    /// `loadAndStore`: deduped loader invocation that persists the result through the store and
    /// emits an error event on failure. `token` is cancelled by the caller when an in-flight SWR
    /// race timed out with `abort_on_timeout` set; a result that only arrives after cancellation
    /// is never persisted.
    async fn load_and_store(
        &self,
        key: &str,
        options: &GetOrSetOptions,
        loader: Arc<dyn Fn(CancellationToken) -> futures_util::future::BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>,
        token: CancellationToken,
    ) -> anyhow::Result<Value> {
        let key_owned = key.to_string();
        let retries = options.retries;
        let set_options = SetOptions {
            stale_time: options.stale_time,
            gc_time: options.gc_time,
            tags: options.tags.clone(),
        };
        let this = self.clone();
        let dedup_key = self.shared.store.full_key(key);

        let result = self
            .shared
            .dedup
            .dedupe(&dedup_key, move || {
                let key_owned = key_owned.clone();
                let this = this.clone();
                let loader = Arc::clone(&loader);
                let token = token.clone();
                async move {
                    let value =
                        this.load_with_retries(key_owned.clone(), retries, token.clone(), loader).await?;
                    if token.is_cancelled() {
                        debug!(key = %key_owned, "discarding loader result that arrived after cancellation");
                        anyhow::bail!("loader result discarded after cancellation");
                    }
                    this.shared.store.set(&key_owned, CacheEntry::new(
                        value.clone(),
                        set_options.stale_time.as_millis() as u64,
                        set_options.gc_time.as_millis() as u64,
                        set_options.tags.clone(),
                    )).await;
                    Ok(value)
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.emit(CacheEvent::Error { key: key.to_string(), message: err.to_string() });
                Err(anyhow::anyhow!("{err}"))
            }
        }
    }

    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: GetOrSetOptions,
    ) -> anyhow::Result<Value>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let loader: Arc<dyn Fn(CancellationToken) -> futures_util::future::BoxFuture<'static, anyhow::Result<Value>> + Send + Sync> =
            Arc::new(move |token| Box::pin(loader(token)));

        if options.fresh {
            return self.load_and_store(key, &options, loader, CancellationToken::new()).await;
        }

        match self.shared.store.get(key).await {
            Some(result) if !result.entry.is_stale() => {
                if let Some(ratio) = options.eager_refresh {
                    if result.entry.is_near_expiration(ratio) {
                        let this = self.clone();
                        let key_owned = key.to_string();
                        let options_clone = options.clone();
                        let loader = Arc::clone(&loader);
                        tokio::spawn(async move {
                            let _ = this
                                .load_and_store(&key_owned, &options_clone, loader, CancellationToken::new())
                                .await;
                        });
                    }
                }
                self.emit(CacheEvent::Hit { key: key.to_string(), driver: "L1", graced: false });
                Ok(result.entry.value)
            }
            Some(result) => {
                // TieredStore::get never returns a garbage entry, so reaching here means stale.
                let this = self.clone();
                let key_owned = key.to_string();
                let options_clone = options.clone();
                let loader_for_refresh = Arc::clone(&loader);
                let outcome = with_swr(
                    Some(result.entry.value),
                    options.timeout,
                    options.abort_on_timeout,
                    |token| async move {
                        this.load_and_store(&key_owned, &options_clone, loader_for_refresh, token).await
                    },
                    || {
                        let this = self.clone();
                        let key_owned = key.to_string();
                        let options_clone = options.clone();
                        let loader = Arc::clone(&loader);
                        tokio::spawn(async move {
                            let _ = this
                                .load_and_store(&key_owned, &options_clone, loader, CancellationToken::new())
                                .await;
                        });
                    },
                )
                .await?;
                self.emit(CacheEvent::Hit {
                    key: key.to_string(),
                    driver: "L1",
                    graced: outcome.stale,
                });
                Ok(outcome.value)
            }
            _ => self.load_and_store(key, &options, loader, CancellationToken::new()).await,
        }
    }

    pub async fn delete(&self, keys: &[String]) -> usize {
        let count = self.shared.store.delete(keys).await;
        for key in keys {
            self.emit(CacheEvent::Delete { key: key.clone() });
        }
        if let Some(sync) = &self.shared.sync {
            // DistributedSync was wired against the root (unnamespaced) store, so remote peers
            // must see this namespace's prefix baked into the key, not the bare caller-facing key.
            let full_keys: Vec<String> = keys.iter().map(|k| self.shared.store.full_key(k)).collect();
            sync.on_delete(&full_keys).await;
        }
        count
    }

    pub async fn clear(&self) {
        self.shared.store.clear().await;
        self.emit(CacheEvent::Clear);
        if let Some(sync) = &self.shared.sync {
            sync.on_clear(self.shared.store.prefix()).await;
        }
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> usize {
        let count = self.shared.store.invalidate_tags(tags).await;
        if let Some(sync) = &self.shared.sync {
            sync.on_invalidate_tags(tags).await;
        }
        count
    }

    /// Rewrites the entry as already-expired (`staleAt = now - 1`); returns whether it existed.
    pub async fn expire(&self, key: &str) -> bool {
        let Some(result) = self.shared.store.get(key).await else {
            return false;
        };
        self.shared.store.set(key, result.entry.expired()).await;
        true
    }

    pub async fn pull(&self, key: &str) -> Option<Value> {
        let value = self.get(key).await;
        self.delete(&[key.to_string()]).await;
        value
    }

    /// A new handle sharing the store (prefixed), event emitter, dedup bookkeeping, and sync —
    /// everything this cache owns, just scoped under `prefix`.
    #[must_use]
    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: self.shared.store.namespace(prefix),
                dedup: self.shared.dedup.clone(),
                events: self.shared.events.clone(),
                sync: self.shared.sync.clone(),
            }),
        }
    }
}

#[must_use]
pub fn default_revalidate_window() -> Duration {
    Duration::from_millis(DEFAULT_REVALIDATE_WINDOW_MS)
}
