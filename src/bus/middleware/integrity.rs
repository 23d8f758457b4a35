//! Integrity/obfuscation middleware: a `Base64Middleware` (obfuscation only, not a security
//! boundary) and an `HmacMiddleware` (authenticates payloads with a keyed hash, rejecting
//! tampered messages instead of delivering them).

use crate::bus::transport::{BoxFuture, RawHandler, ReconnectCallback, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted HMAC key length, matching common guidance for HMAC-SHA256 keys.
pub const MIN_HMAC_KEY_LEN: usize = 32;

/// Base64-wraps every payload. This is obfuscation, not encryption or authentication — it does
/// not protect confidentiality or integrity against a capable attacker.
#[derive(Debug)]
pub struct Base64Middleware {
    inner: Arc<dyn Transport>,
}

impl Base64Middleware {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for Base64Middleware {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.inner
            .publish(channel, STANDARD.encode(payload).into_bytes())
            .await
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        let wrapped: RawHandler = Arc::new(move |payload: Vec<u8>| -> BoxFuture<()> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match STANDARD.decode(&payload) {
                    Ok(decoded) => handler(decoded).await,
                    Err(e) => error!(error = %e, "dropping message with invalid base64 framing"),
                }
            })
        });
        self.inner.subscribe(channel, wrapped).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(channel).await
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        self.inner.on_reconnect(callback).await;
    }

    fn name(&self) -> &'static str {
        "base64-obfuscation"
    }
}

/// Signs every outgoing payload with HMAC-SHA256 and rejects (never delivers) any incoming
/// payload whose signature does not verify. Verification failure is security-critical and is
/// never retried — the message is simply dropped.
#[derive(Debug)]
pub struct HmacMiddleware {
    inner: Arc<dyn Transport>,
    key: Vec<u8>,
}

impl HmacMiddleware {
    /// # Panics
    /// Panics if `key` is shorter than [`MIN_HMAC_KEY_LEN`] bytes — a short HMAC key is a
    /// configuration error, not a runtime condition callers should handle.
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>, key: Vec<u8>) -> Self {
        assert!(
            key.len() >= MIN_HMAC_KEY_LEN,
            "HMAC key must be at least {MIN_HMAC_KEY_LEN} bytes"
        );
        Self { inner, key }
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }
}

#[async_trait]
impl Transport for HmacMiddleware {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let signature = self.sign(&payload);
        let mut framed = Vec::with_capacity(payload.len() + signature.len());
        framed.extend(payload);
        framed.extend(signature);
        self.inner.publish(channel, framed).await
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        let key = self.key.clone();
        let wrapped: RawHandler = Arc::new(move |framed: Vec<u8>| -> BoxFuture<()> {
            let handler = Arc::clone(&handler);
            let key = key.clone();
            Box::pin(async move {
                if framed.len() < 32 {
                    error!("dropping message too short to carry an HMAC signature");
                    return;
                }
                let split_at = framed.len() - 32;
                let (body, signature) = framed.split_at(split_at);
                let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
                    .expect("HMAC accepts keys of any length");
                mac.update(body);
                if mac.verify_slice(signature).is_ok() {
                    handler(body.to_vec()).await;
                } else {
                    error!("dropping message with invalid HMAC signature");
                }
            })
        });
        self.inner.subscribe(channel, wrapped).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(channel).await
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        self.inner.on_reconnect(callback).await;
    }

    fn name(&self) -> &'static str {
        "hmac"
    }
}
