//! Gzip compression middleware. Prepends a 1-byte format marker so decompression can dispatch
//! without out-of-band configuration, and skips compression below a size threshold where the
//! gzip framing overhead would outweigh the benefit.

use crate::bus::transport::{BoxFuture, RawHandler, ReconnectCallback, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;
use std::sync::Arc;

const MARKER_RAW: u8 = 0x00;
const MARKER_GZIP: u8 = 0x01;

/// Default: payloads smaller than this are passed through uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

#[derive(Debug)]
pub struct CompressionMiddleware {
    inner: Arc<dyn Transport>,
    threshold: usize,
}

impl CompressionMiddleware {
    #[must_use]
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_threshold(inner: Arc<dyn Transport>, threshold: usize) -> Self {
        Self { inner, threshold }
    }

    fn compress(&self, payload: Vec<u8>) -> Vec<u8> {
        if payload.len() < self.threshold {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(MARKER_RAW);
            out.extend(payload);
            return out;
        }
        let mut encoder = GzEncoder::new(payload.as_slice(), Compression::default());
        let mut compressed = Vec::new();
        if encoder.read_to_end(&mut compressed).is_err() {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(MARKER_RAW);
            out.extend(payload);
            return out;
        }
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(MARKER_GZIP);
        out.extend(compressed);
        out
    }

    fn decompress(payload: Vec<u8>) -> Vec<u8> {
        let Some((&marker, body)) = payload.split_first() else {
            return payload;
        };
        match marker {
            MARKER_GZIP => {
                let mut decoder = GzDecoder::new(body);
                let mut out = Vec::new();
                if decoder.read_to_end(&mut out).is_ok() {
                    out
                } else {
                    body.to_vec()
                }
            }
            _ => body.to_vec(),
        }
    }
}

#[async_trait]
impl Transport for CompressionMiddleware {
    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.inner.publish(channel, self.compress(payload)).await
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        let wrapped: RawHandler = Arc::new(move |payload: Vec<u8>| -> BoxFuture<()> {
            let handler = Arc::clone(&handler);
            let payload = Self::decompress(payload);
            Box::pin(async move { handler(payload).await })
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
        "compression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_large_payload() {
        let mw = CompressionMiddleware::with_threshold(
            Arc::new(crate::bus::memory_transport::MemoryTransport::new()),
            8,
        );
        let payload = vec![b'x'; 4096];
        let compressed = mw.compress(payload.clone());
        assert_eq!(compressed[0], MARKER_GZIP);
        assert!(compressed.len() < payload.len());
        assert_eq!(CompressionMiddleware::decompress(compressed), payload);
    }

    #[test]
    fn skips_small_payload() {
        let mw = CompressionMiddleware::new(Arc::new(crate::bus::memory_transport::MemoryTransport::new()));
        let payload = vec![1, 2, 3];
        let out = mw.compress(payload.clone());
        assert_eq!(out[0], MARKER_RAW);
        assert_eq!(CompressionMiddleware::decompress(out), payload);
    }
}
