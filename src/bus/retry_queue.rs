//! Backoff strategies and the background retry queue.
//!
//! Two complementary mechanisms share this module: the pure backoff functions used inline by
//! [`crate::bus::middleware::retry::RetryMiddleware`], and [`RetryQueue`], an optional
//! in-memory bulk-resiliency queue for publishes that should be retried on a schedule rather
//! than blocking the original caller.

use crate::bus::transport::Transport;
use crate::error::{QueueError, QueueErrorCode};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// A pure function of `attempt` (1-based) and `base_delay` producing the delay before the next
/// attempt.
pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, attempt: u32, base_delay: Duration) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Exponential;

impl BackoffStrategy for Exponential {
    fn delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        base_delay.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl BackoffStrategy for Linear {
    fn delay(&self, _attempt: u32, base_delay: Duration) -> Duration {
        base_delay
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fibonacci;

impl BackoffStrategy for Fibonacci {
    fn delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        base_delay.saturating_mul(fib(attempt.max(1)))
    }
}

fn fib(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Decorator clamping a strategy's output at `cap`.
pub struct WithMaxDelay<S> {
    inner: S,
    cap: Duration,
}

impl<S: BackoffStrategy> WithMaxDelay<S> {
    pub fn new(inner: S, cap: Duration) -> Self {
        Self { inner, cap }
    }
}

impl<S: BackoffStrategy> BackoffStrategy for WithMaxDelay<S> {
    fn delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        self.inner.delay(attempt, base_delay).min(self.cap)
    }
}

/// Decorator adding ±`factor` multiplicative jitter, clamped at zero.
pub struct WithJitter<S> {
    inner: S,
    factor: f64,
}

impl<S: BackoffStrategy> WithJitter<S> {
    pub fn new(inner: S, factor: f64) -> Self {
        Self {
            inner,
            factor: factor.clamp(0.0, 1.0),
        }
    }
}

impl<S: BackoffStrategy> BackoffStrategy for WithJitter<S> {
    fn delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        let base = self.inner.delay(attempt, base_delay);
        let noise = rand::random::<f64>().mul_add(2.0, -1.0) * self.factor;
        let scaled = (base.as_secs_f64() * (1.0 + noise)).max(0.0);
        Duration::from_secs_f64(scaled)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
struct QueuedMessage {
    channel: String,
    payload: Vec<u8>,
    attempts: u32,
    next_retry_at: u64,
    created_at: u64,
    last_error: Option<String>,
}

/// Configuration for [`RetryQueue`].
pub struct RetryQueueConfig {
    pub max_size: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub interval: Duration,
    pub concurrency: usize,
    pub remove_duplicates: bool,
    pub backoff: Arc<dyn BackoffStrategy>,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            interval: Duration::from_secs(1),
            concurrency: 8,
            remove_duplicates: true,
            backoff: Arc::new(Exponential),
        }
    }
}

type DeadLetterCallback =
    Arc<dyn Fn(String, Vec<u8>, String, u32) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// In-memory bulk-retry queue. Not persistent: messages still pending at process exit are
/// lost, matching the in-memory-only non-goal.
pub struct RetryQueue {
    storage: Arc<DashMap<String, QueuedMessage>>,
    config: RetryQueueConfig,
    transport: Arc<dyn Transport>,
    dead_letter: Mutex<Option<DeadLetterCallback>>,
    size: AtomicU64,
}

impl RetryQueue {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: RetryQueueConfig) -> Self {
        Self {
            storage: Arc::new(DashMap::new()),
            config,
            transport,
            dead_letter: Mutex::new(None),
            size: AtomicU64::new(0),
        }
    }

    pub async fn on_dead_letter(&self, callback: DeadLetterCallback) {
        *self.dead_letter.lock().await = Some(callback);
    }

    fn message_id(&self, channel: &str, payload: &[u8]) -> String {
        if self.config.remove_duplicates {
            let mut hasher = Sha256::new();
            hasher.update(channel.as_bytes());
            hasher.update(payload);
            format!("{:x}", hasher.finalize())
        } else {
            uuid::Uuid::new_v4().to_string()
        }
    }

    /// Enqueue a message for background retry.
    ///
    /// # Errors
    /// Returns [`QueueError`] with code `QUEUE_FULL` when the queue is already at capacity.
    pub fn enqueue(&self, channel: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let id = self.message_id(channel, &payload);
        if self.config.remove_duplicates && self.storage.contains_key(&id) {
            return Ok(());
        }
        if self.storage.len() >= self.config.max_size {
            return Err(QueueError {
                code: QueueErrorCode::QueueFull,
                current_size: self.storage.len(),
                max_size: self.config.max_size,
            });
        }
        let now = now_millis();
        self.storage.insert(
            id,
            QueuedMessage {
                channel: channel.to_string(),
                payload,
                attempts: 0,
                next_retry_at: now,
                created_at: now,
                last_error: None,
            },
        );
        self.size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Run one scan-and-retry pass. Intended to be called from a periodic scheduler loop.
    pub async fn tick(&self) {
        let now = now_millis();
        let due: Vec<String> = self
            .storage
            .iter()
            .filter(|e| e.value().next_retry_at <= now)
            .map(|e| e.key().clone())
            .take(self.config.concurrency)
            .collect();

        let mut handles = Vec::with_capacity(due.len());
        for id in due {
            let Some(message) = self.storage.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            let transport = Arc::clone(&self.transport);
            handles.push(async move {
                let result = transport.publish(&message.channel, message.payload.clone()).await;
                (id, message, result)
            });
        }

        for (id, mut message, result) in futures_util::future::join_all(handles).await {
            match result {
                Ok(()) => {
                    self.storage.remove(&id);
                    self.size.fetch_sub(1, Ordering::Relaxed);
                }
                Err(e) => {
                    message.attempts += 1;
                    message.last_error = Some(e.to_string());
                    if message.attempts >= self.config.max_attempts {
                        warn!(channel = %message.channel, attempts = message.attempts, "dead-lettering queued message");
                        self.storage.remove(&id);
                        self.size.fetch_sub(1, Ordering::Relaxed);
                        if let Some(cb) = self.dead_letter.lock().await.clone() {
                            cb(message.channel, message.payload, e.to_string(), message.attempts).await;
                        }
                    } else {
                        let delay = self.config.backoff.delay(message.attempts, self.config.base_delay);
                        message.next_retry_at = now_millis() + delay.as_millis() as u64;
                        debug!(channel = %message.channel, attempts = message.attempts, "scheduling retry");
                        self.storage.insert(id, message);
                    }
                }
            }
        }
    }

    /// Spawn a periodic scheduler that calls [`RetryQueue::tick`] on `config.interval`.
    pub fn spawn_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        let interval = queue.config.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                queue.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_each_attempt() {
        let s = Exponential;
        let base = Duration::from_millis(100);
        assert_eq!(s.delay(1, base), Duration::from_millis(100));
        assert_eq!(s.delay(2, base), Duration::from_millis(200));
        assert_eq!(s.delay(3, base), Duration::from_millis(400));
    }

    #[test]
    fn linear_is_constant() {
        let s = Linear;
        let base = Duration::from_millis(50);
        assert_eq!(s.delay(1, base), base);
        assert_eq!(s.delay(10, base), base);
    }

    #[test]
    fn fibonacci_matches_sequence() {
        let s = Fibonacci;
        let base = Duration::from_millis(10);
        assert_eq!(s.delay(1, base), Duration::from_millis(10));
        assert_eq!(s.delay(2, base), Duration::from_millis(10));
        assert_eq!(s.delay(3, base), Duration::from_millis(20));
        assert_eq!(s.delay(4, base), Duration::from_millis(30));
        assert_eq!(s.delay(5, base), Duration::from_millis(50));
    }

    #[test]
    fn with_max_delay_clamps() {
        let s = WithMaxDelay::new(Exponential, Duration::from_millis(150));
        let base = Duration::from_millis(100);
        assert_eq!(s.delay(1, base), Duration::from_millis(100));
        assert_eq!(s.delay(5, base), Duration::from_millis(150));
    }
}
