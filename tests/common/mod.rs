//! Shared test helpers: a chaos transport wrapper used to simulate outages without a live
//! broker.

use async_trait::async_trait;
use cachebus::bus::transport::{RawHandler, ReconnectCallback, Transport};
use cachebus::error::{TransportError, TransportErrorCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wraps any [`Transport`] and can be toggled to fail every `publish`/`subscribe` call, the same
/// way the bus's own `#[ignore]`-by-default Redis tests simulate an outage without a live broker.
#[derive(Debug)]
pub struct ChaosTransport {
    inner: Arc<dyn Transport>,
    failing: AtomicBool,
}

impl ChaosTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner, failing: AtomicBool::new(false) }
    }

    pub fn always_fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ChaosTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportErrorCode::PublishFailed, "chaos: publish failed")
                .with_channel(channel.to_string()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportErrorCode::SubscribeFailed, "chaos: subscribe failed")
                .with_channel(channel.to_string()));
        }
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(channel).await
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        self.inner.on_reconnect(callback).await;
    }

    fn name(&self) -> &'static str {
        "chaos"
    }
}
