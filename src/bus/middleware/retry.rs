//! Inline retry middleware: retries a failed publish with backoff, up to `max_attempts`, then
//! wraps the final error as a [`DeadLetterError`] and fires `on_dead_letter`.

use crate::bus::retry_queue::BackoffStrategy;
use crate::bus::transport::{ReconnectCallback, RawHandler, Transport};
use crate::error::{BusOperationError, DeadLetterError, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

type OnRetry = Arc<dyn Fn(&str, &[u8], u32) + Send + Sync>;
type OnDeadLetter =
    Arc<dyn Fn(&str, &[u8], &anyhow::Error, u32) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct RetryMiddleware {
    inner: Arc<dyn Transport>,
    max_attempts: u32,
    base_delay: Duration,
    backoff: Arc<dyn BackoffStrategy>,
    on_retry: Mutex<Option<OnRetry>>,
    on_dead_letter: Mutex<Option<OnDeadLetter>>,
}

impl std::fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl RetryMiddleware {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, max_attempts: u32, base_delay: Duration, backoff: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
            on_retry: Mutex::new(None),
            on_dead_letter: Mutex::new(None),
        }
    }

    pub fn set_on_retry(&self, callback: OnRetry) {
        *self.on_retry.lock() = Some(callback);
    }

    pub fn set_on_dead_letter(&self, callback: OnDeadLetter) {
        *self.on_dead_letter.lock() = Some(callback);
    }
}

#[async_trait]
impl Transport for RetryMiddleware {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.publish(channel, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.retryable || attempt >= self.max_attempts => {
                    if attempt >= self.max_attempts {
                        let cause = anyhow::anyhow!(e.to_string());
                        if let Some(cb) = self.on_dead_letter.lock().clone() {
                            cb(channel, &payload, &cause, attempt).await;
                        }
                        let dead_letter = DeadLetterError {
                            channel: channel.to_string(),
                            attempts: attempt,
                            max_attempts: self.max_attempts,
                            cause,
                        };
                        return Err(TransportError::new(e.code, dead_letter.to_string())
                            .with_channel(channel.to_string())
                            .retryable(false)
                            .with_cause(BusOperationError::from(dead_letter).into()));
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(channel, attempt, error = %e, "publish failed, retrying");
                    if let Some(cb) = self.on_retry.lock().clone() {
                        cb(channel, &payload, attempt);
                    }
                    let delay = self.backoff.delay(attempt, self.base_delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(channel).await
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        self.inner.on_reconnect(callback).await;
    }

    fn name(&self) -> &'static str {
        "retry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::retry_queue::Linear;
    use crate::error::TransportErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct AlwaysFails {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Transport for AlwaysFails {
        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn publish(&self, channel: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new(TransportErrorCode::PublishFailed, "boom").with_channel(channel.to_string()))
        }
        async fn subscribe(&self, _channel: &str, _handler: RawHandler) -> Result<(), TransportError> {
            Ok(())
        }
        async fn unsubscribe(&self, _channel: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn on_reconnect(&self, _callback: ReconnectCallback) {}
        fn name(&self) -> &'static str {
            "always-fails"
        }
    }

    #[tokio::test]
    async fn exhausts_attempts_and_dead_letters() {
        let inner = Arc::new(AlwaysFails { attempts: AtomicU32::new(0) });
        let mw = RetryMiddleware::new(
            Arc::clone(&inner) as Arc<dyn Transport>,
            3,
            Duration::from_millis(1),
            Arc::new(Linear),
        );
        let dead_lettered = Arc::new(AtomicU32::new(0));
        let dl = Arc::clone(&dead_lettered);
        mw.set_on_dead_letter(Arc::new(move |_ch, _payload, _err, attempts| {
            dl.fetch_add(attempts, Ordering::SeqCst);
            Box::pin(async {})
        }));
        let err = mw.publish("ch", vec![1]).await.unwrap_err();
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(dead_lettered.load(Ordering::SeqCst), 3);
        assert!(!err.retryable);
    }
}
