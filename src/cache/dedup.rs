//! Single-flight loader coalescing plus a stale-while-revalidate (SWR) runtime.
//!
//! Inflight dedup mirrors the teacher's `CacheManagerInner::in_flight_requests: DashMap<String,
//! Arc<Mutex<()>>>` plus `CleanupGuard` RAII-removal (`cache_manager.rs`), generalized to share
//! the loader's actual result (or error) with every waiter rather than just a mutex permit —
//! done here with `futures_util::future::Shared` instead of a bare mutex, since waiters need the
//! value, not just a turn.

use crate::bus::value::Value;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::timeout as tokio_timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type LoadResult = Result<Value, Arc<anyhow::Error>>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
struct SwrSlot {
    data: Value,
    cached_at: u64,
}

/// Default window between successive background revalidations of the same key.
pub const DEFAULT_REVALIDATE_WINDOW_MS: u64 = 2_000;

#[derive(Default)]
struct Inner {
    pending: DashMap<String, SharedLoad>,
    swr_cache: DashMap<String, SwrSlot>,
    pending_revalidations: DashMap<String, ()>,
    last_revalidation: DashMap<String, u64>,
}

/// Cheaply cloneable — every clone shares the same in-flight/SWR bookkeeping, so background
/// revalidation tasks can hold their own clone independent of the caller's lifetime.
#[derive(Clone, Default)]
pub struct Deduplicator {
    inner: Arc<Inner>,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain inflight dedup: at most one `loader` per key runs concurrently; every other caller
    /// for the same key awaits the same result.
    ///
    /// Creating the slot happens under `DashMap`'s per-shard lock via `entry().or_insert_with`,
    /// so two callers racing on the same key can never both observe an empty slot and both start
    /// the loader.
    pub async fn dedupe<F, Fut>(&self, key: &str, loader: F) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let shared: SharedLoad = self
            .inner
            .pending
            .entry(key.to_string())
            .or_insert_with(|| loader().map(|r| r.map_err(Arc::new)).boxed().shared())
            .clone();
        let result = shared.await;
        self.inner.pending.remove(key);
        result
    }

    /// SWR read: returns cached data immediately when present (scheduling a background
    /// revalidation if stale), otherwise single-flights the loader.
    pub async fn get_or_revalidate<F, Fut, OnErr>(
        &self,
        key: &str,
        stale_time: Duration,
        revalidate_window: Duration,
        loader: F,
        on_error: OnErr,
    ) -> LoadResult
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
        OnErr: Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    {
        if let Some(slot) = self.inner.swr_cache.get(key).map(|s| s.clone()) {
            let now = now_millis();
            let is_stale = u128::from(now.saturating_sub(slot.cached_at)) > stale_time.as_millis();
            if is_stale {
                self.maybe_schedule_revalidation(key, revalidate_window, loader, on_error);
            }
            return Ok(slot.data);
        }

        self.inner.pending_revalidations.insert(key.to_string(), ());
        let result = self.dedupe(key, loader).await;
        self.inner.pending_revalidations.remove(key);
        self.inner.last_revalidation.insert(key.to_string(), now_millis());

        match &result {
            Ok(value) => {
                self.inner.swr_cache.insert(
                    key.to_string(),
                    SwrSlot { data: value.clone(), cached_at: now_millis() },
                );
            }
            Err(err) => on_error(key, err),
        }
        result
    }

    fn maybe_schedule_revalidation<F, Fut, OnErr>(
        &self,
        key: &str,
        revalidate_window: Duration,
        loader: F,
        on_error: OnErr,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
        OnErr: Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    {
        if self.inner.pending_revalidations.contains_key(key) {
            return;
        }
        if let Some(last) = self.inner.last_revalidation.get(key) {
            if now_millis().saturating_sub(*last) < revalidate_window.as_millis() as u64 {
                return;
            }
        }
        debug!(key, "scheduling background SWR revalidation");
        self.inner.pending_revalidations.insert(key.to_string(), ());

        let key_owned = key.to_string();
        let dedup = self.clone();
        tokio::spawn(async move {
            let result = loader().await;
            match &result {
                Ok(value) => {
                    dedup.inner.swr_cache.insert(
                        key_owned.clone(),
                        SwrSlot { data: value.clone(), cached_at: now_millis() },
                    );
                }
                Err(err) => on_error(&key_owned, err),
            }
            dedup.inner.last_revalidation.insert(key_owned.clone(), now_millis());
            dedup.inner.pending_revalidations.remove(&key_owned);
        });
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.swr_cache.remove(key);
        self.inner.pending_revalidations.remove(key);
        self.inner.last_revalidation.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.inner.swr_cache.clear();
        self.inner.pending_revalidations.clear();
        self.inner.last_revalidation.clear();
    }
}

/// Outcome of `with_swr`: whether the returned value is fresh (the loader actually ran to
/// completion) or the stale fallback (loader timed out or was never raced in the first place).
#[derive(Debug, Clone)]
pub struct SwrOutcome {
    pub value: Value,
    pub stale: bool,
}

/// SWR timing helper used by `InternalCache::get_or_set` when a stale entry already exists.
///
/// - No stale value: just await `fn(token)`.
/// - `timeout = Duration::ZERO`: return the stale value immediately, kicking off
///   `background_refresh` first.
/// - `timeout > 0`: race `fn(token)` against the timer. Fetch wins -> fresh value. Timer wins ->
///   if `abort_on_timeout`, cancel `token` and kick `background_refresh`; return the stale value.
/// - No timeout at all: just await `fn(token)`.
pub async fn with_swr<F, Fut, B>(
    stale_value: Option<Value>,
    timeout: Option<Duration>,
    abort_on_timeout: bool,
    f: F,
    background_refresh: B,
) -> anyhow::Result<SwrOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Value>>,
    B: FnOnce(),
{
    let token = CancellationToken::new();

    let Some(stale_value) = stale_value else {
        let value = f(token).await?;
        return Ok(SwrOutcome { value, stale: false });
    };

    let Some(timeout) = timeout else {
        let value = f(token).await?;
        return Ok(SwrOutcome { value, stale: false });
    };

    if timeout.is_zero() {
        background_refresh();
        return Ok(SwrOutcome { value: stale_value, stale: true });
    }

    match tokio_timeout(timeout, f(token.clone())).await {
        Ok(Ok(value)) => Ok(SwrOutcome { value, stale: false }),
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => {
            if abort_on_timeout {
                token.cancel();
            }
            background_refresh();
            Ok(SwrOutcome { value: stale_value, stale: true })
        }
    }
}
