//! Retry-with-dead-letter scenario: a transport that always fails, wrapped in `RetryMiddleware`.

mod common;

use async_trait::async_trait;
use cachebus::bus::memory_transport::MemoryTransport;
use cachebus::bus::middleware::RetryMiddleware;
use cachebus::bus::retry_queue::Exponential;
use cachebus::bus::transport::{RawHandler, ReconnectCallback, Transport};
use cachebus::error::{TransportError, TransportErrorCode};
use common::ChaosTransport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn exhausted_retries_dead_letter_and_report_exact_attempt_count() {
    let chaos = Arc::new(ChaosTransport::new(Arc::new(MemoryTransport::new())));
    chaos.always_fail();

    let retry = RetryMiddleware::new(
        Arc::clone(&chaos) as Arc<dyn Transport>,
        3,
        Duration::from_millis(1),
        Arc::new(Exponential),
    );

    let dead_lettered = Arc::new(AtomicU32::new(0));
    let dl = Arc::clone(&dead_lettered);
    retry.set_on_dead_letter(Arc::new(move |_channel, _payload, _err, attempts| {
        dl.fetch_add(attempts, Ordering::SeqCst);
        Box::pin(async {})
    }));

    let err = retry.publish("ch", b"hello".to_vec()).await.unwrap_err();

    assert!(!err.retryable);
    assert_eq!(dead_lettered.load(Ordering::SeqCst), 3);
}

/// A transport double that fails a fixed number of times before succeeding, so the retry
/// scenario can also assert the success path once the underlying outage clears mid-retry.
#[derive(Debug)]
struct FlakyTransport {
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }
    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
    async fn publish(&self, channel: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::new(TransportErrorCode::PublishFailed, "flaky").with_channel(channel.to_string()));
        }
        Ok(())
    }
    async fn subscribe(&self, _channel: &str, _handler: RawHandler) -> Result<(), TransportError> {
        Ok(())
    }
    async fn unsubscribe(&self, _channel: &str) -> Result<(), TransportError> {
        Ok(())
    }
    async fn on_reconnect(&self, _callback: ReconnectCallback) {}
    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn recovers_within_max_attempts() {
    let inner = Arc::new(FlakyTransport { remaining_failures: AtomicU32::new(2), attempts: AtomicU32::new(0) });
    let retry = RetryMiddleware::new(
        Arc::clone(&inner) as Arc<dyn Transport>,
        5,
        Duration::from_millis(1),
        Arc::new(Exponential),
    );

    retry.publish("ch", b"hello".to_vec()).await.unwrap();
    assert_eq!(inner.attempts.load(Ordering::SeqCst), 3);
}
