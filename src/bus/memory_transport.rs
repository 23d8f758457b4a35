//! In-process transport. Each instance owns its own handler table — no process-wide global
//! state, so tests running concurrently never bleed into each other.

use crate::bus::transport::{RawHandler, ReconnectCallback, Transport};
use crate::error::{TransportError, TransportErrorCode};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct ChannelQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// Process-local pub/sub transport.
///
/// `publish` never runs a handler inline — it only enqueues onto a per-channel queue, so a
/// publisher holding a lock can never deadlock its own handler. A single background worker per
/// channel drains that queue strictly in enqueue order, so two publishes to the same channel are
/// always dispatched in publish order even though the handlers for a given message all run
/// concurrently with each other.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    handlers: Arc<DashMap<String, Vec<RawHandler>>>,
    queues: DashMap<String, ChannelQueue>,
    connected: AtomicBool,
    reconnect_callback: Mutex<Option<ReconnectCallback>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::new(
                TransportErrorCode::NotReady,
                "memory transport is not connected",
            ))
        }
    }

    fn ensure_queue(&self, channel: &str) {
        if self.queues.contains_key(channel) {
            return;
        }
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        self.queues.insert(channel.to_string(), ChannelQueue { sender });
        let handlers = Arc::clone(&self.handlers);
        let channel = channel.to_string();
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let Some(entry) = handlers.get(&channel) else {
                    trace!(channel = %channel, "dropping queued message with no subscribers");
                    continue;
                };
                let calls = entry.value().iter().cloned().map(|handler| {
                    let payload = payload.clone();
                    async move { handler(payload).await }
                });
                drop(entry);
                join_all(calls).await;
            }
        });
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Release);
        debug!("memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        self.handlers.clear();
        self.queues.clear();
        debug!("memory transport disconnected");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let Some(queue) = self.queues.get(channel) else {
            trace!(channel, "publish with no subscribers");
            return Ok(());
        };
        // The receiving worker only ever shuts down via `disconnect` dropping it, so a send
        // failure here would mean the channel was torn down concurrently with this publish;
        // treat it the same as "no subscribers" rather than surfacing an error.
        let _ = queue.sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut entry = self.handlers.entry(channel.to_string()).or_default();
        if !entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.push(handler);
        }
        drop(entry);
        self.ensure_queue(channel);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.handlers.remove(channel);
        self.queues.remove(channel);
        Ok(())
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        *self.reconnect_callback.lock() = Some(callback);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
