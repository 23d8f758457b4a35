//! Transport: the abstract pub/sub contract every concrete backend and middleware implements.

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A raw (already-encoded) message handler registered with a transport.
pub type RawHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<()> + Send + Sync>;

/// A boxed future, used for handler and reconnect callbacks that may need to suspend.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A callback invoked after the transport automatically reconnects.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<()> + Send + Sync>;

/// Abstract pub/sub transport. `connect`/`disconnect` must be idempotent; `publish` is
/// fire-and-forget (no delivery acknowledgment).
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Establish the underlying connection(s). Idempotent.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the underlying connection(s). Idempotent.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish raw bytes to a channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Register a raw handler for a channel. Implementations that subscribe lazily per-channel
    /// (e.g. Redis) should issue the subscribe here.
    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError>;

    /// Remove the subscription for a channel entirely.
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Register a callback fired after a successful reconnect, so callers (the bus) can
    /// re-issue outstanding subscribes.
    async fn on_reconnect(&self, callback: ReconnectCallback);

    /// A short identifier used for logging.
    fn name(&self) -> &'static str;
}
