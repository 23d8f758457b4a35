//! Two-state circuit breaker guarding an L2 layer: `closed` or `open(until)`. Time is the only
//! re-close signal — there is no explicit half-open state; the first call after `until` elapses
//! is itself the probe.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Injectable clock so breaker transitions can be driven deterministically in tests, the same
/// way the teacher's resilience primitives abstract over wall-clock time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// `open_until == 0` means closed. Both fields are atomics so `is_open`/`record_*` never block.
pub struct CircuitBreaker {
    failure_count: AtomicUsize,
    open_until_millis: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Box<dyn Clock>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: CircuitBreakerConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            failure_count: AtomicUsize::new(0),
            open_until_millis: AtomicU64::new(0),
            config,
            clock,
        }
    }

    /// Checks the clock first: if the break has expired, reverts to closed (resetting the
    /// counter) and returns `false`.
    pub fn is_open(&self) -> bool {
        let until = self.open_until_millis.load(Ordering::Acquire);
        if until == 0 {
            return false;
        }
        if self.clock.now_millis() >= until {
            self.open_until_millis.store(0, Ordering::Release);
            self.failure_count.store(0, Ordering::Release);
            return false;
        }
        true
    }

    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.config.failure_threshold {
            let until = self.clock.now_millis() + self.config.break_duration.as_millis() as u64;
            self.open_until_millis.store(until, Ordering::Release);
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);
    }

    /// Run `f` unless the breaker is open, in which case `fallback` is returned immediately.
    /// Records success/failure on the breaker based on `f`'s outcome.
    pub async fn guarded_call<T, E, F, Fut>(&self, f: F, fallback: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if self.is_open() {
            return fallback;
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(_) => {
                self.record_failure();
                fallback
            }
        }
    }
}
