//! Redis Pub/Sub transport.
//!
//! Two independent connections: a `ConnectionManager` for publishes (handles its own
//! reconnection transparently) and a dedicated Pub/Sub connection owned by a background task,
//! since Redis Pub/Sub mode blocks other commands on the same connection. The background task
//! re-subscribes every channel it knows about whenever the Pub/Sub connection needs to be
//! re-established, and invokes the registered reconnect callback so the owning [`crate::bus::message_bus::MessageBus`]
//! can do the same at its own bookkeeping layer.

use crate::bus::transport::{RawHandler, ReconnectCallback, Transport};
use crate::error::{TransportError, TransportErrorCode};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

enum Command {
    Subscribe(String, oneshot::Sender<Result<(), TransportError>>),
    Unsubscribe(String, oneshot::Sender<Result<(), TransportError>>),
}

/// Redis-backed [`Transport`]. Works against standalone or cluster-fronting proxies that speak
/// the standard `PUBLISH`/`SUBSCRIBE` protocol.
pub struct RedisTransport {
    client: redis::Client,
    publisher: Mutex<Option<ConnectionManager>>,
    handlers: Arc<DashMap<String, RawHandler>>,
    connected: AtomicBool,
    reconnect_callback: Arc<Mutex<Option<ReconnectCallback>>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    shutdown_tx: broadcast::Sender<()>,
    reconnect_delay: Duration,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport").finish_non_exhaustive()
    }
}

impl RedisTransport {
    /// # Errors
    /// Returns an error if `redis_url` cannot be parsed into a client.
    pub fn new(redis_url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            TransportError::new(
                TransportErrorCode::ConnectionFailed,
                format!("invalid redis url: {e}"),
            )
            .with_cause(e.into())
        })?;
        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            client,
            publisher: Mutex::new(None),
            handlers: Arc::new(DashMap::new()),
            connected: AtomicBool::new(false),
            reconnect_callback: Arc::new(Mutex::new(None)),
            command_tx: Mutex::new(None),
            shutdown_tx,
            reconnect_delay: Duration::from_secs(5),
        })
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::new(
                TransportErrorCode::NotReady,
                "redis transport is not connected",
            ))
        }
    }

    fn spawn_subscriber_loop(&self) -> mpsc::UnboundedSender<Command> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let handlers = Arc::clone(&self.handlers);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let reconnect_delay = self.reconnect_delay;
        // Shared (not snapshotted) so a callback registered via `on_reconnect` after `connect()`
        // is still picked up by the already-running loop on its next reconnection.
        let reconnect_callback = Arc::clone(&self.reconnect_callback);
        tokio::spawn(subscriber_loop(
            client,
            handlers,
            command_rx,
            shutdown_rx,
            reconnect_delay,
            reconnect_callback,
        ));
        command_tx
    }
}

async fn subscriber_loop(
    client: redis::Client,
    handlers: Arc<DashMap<String, RawHandler>>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: broadcast::Receiver<()>,
    reconnect_delay: Duration,
    reconnect_callback: Arc<Mutex<Option<ReconnectCallback>>>,
) {
    let mut first_connection = true;
    loop {
        let pubsub = match client.get_async_pubsub().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to open redis pubsub connection, retrying");
                tokio::select! {
                    () = tokio::time::sleep(reconnect_delay) => continue,
                    _ = shutdown_rx.recv() => return,
                }
            }
        };
        let mut pubsub = pubsub;
        for channel in handlers.iter().map(|e| e.key().clone()) {
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(channel = %channel, error = %e, "failed to re-subscribe after reconnect");
            }
        }
        info!(channels = handlers.len(), "redis pubsub connection established");
        if !first_connection {
            let callback = reconnect_callback.lock().clone();
            if let Some(callback) = callback {
                callback().await;
            }
        }
        first_connection = false;

        let mut needs_reconnect = false;
        'inner: loop {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => {
                                let channel = msg.get_channel_name().to_string();
                                let Ok(payload) = msg.get_payload::<Vec<u8>>() else { continue };
                                if let Some(handler) = handlers.get(&channel) {
                                    let handler = Arc::clone(handler.value());
                                    tokio::spawn(async move { handler(payload).await; });
                                }
                            }
                            None => {
                                warn!("redis pubsub stream ended, reconnecting");
                                needs_reconnect = true;
                                break 'inner;
                            }
                        }
                    }
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(Command::Subscribe(channel, reply)) => {
                                drop(stream);
                                let result = pubsub.subscribe(&channel).await.map_err(|e| {
                                    TransportError::new(TransportErrorCode::SubscribeFailed, e.to_string())
                                        .with_channel(channel.clone())
                                        .with_cause(e.into())
                                });
                                let _ = reply.send(result);
                                continue 'inner;
                            }
                            Some(Command::Unsubscribe(channel, reply)) => {
                                drop(stream);
                                let result = pubsub.unsubscribe(&channel).await.map_err(|e| {
                                    TransportError::new(TransportErrorCode::UnsubscribeFailed, e.to_string())
                                        .with_channel(channel.clone())
                                        .with_cause(e.into())
                                });
                                handlers.remove(&channel);
                                let _ = reply.send(result);
                                continue 'inner;
                            }
                            None => return,
                        }
                    }
                    _ = shutdown_rx.recv() => return,
                }
            }
        }
        if !needs_reconnect {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(reconnect_delay) => {},
            _ = shutdown_rx.recv() => return,
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn_manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                TransportError::new(TransportErrorCode::ConnectionFailed, e.to_string())
                    .with_cause(e.into())
            })?;
        *self.publisher.lock() = Some(conn_manager);
        let tx = self.spawn_subscriber_loop();
        *self.command_tx.lock() = Some(tx);
        self.connected.store(true, Ordering::Release);
        debug!("redis transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        *self.publisher.lock() = None;
        *self.command_tx.lock() = None;
        self.handlers.clear();
        debug!("redis transport disconnected");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut conn = self
            .publisher
            .lock()
            .clone()
            .ok_or_else(|| TransportError::new(TransportErrorCode::NotReady, "no publisher connection"))?;
        conn.publish::<_, _, ()>(channel, payload).await.map_err(|e| {
            TransportError::new(TransportErrorCode::PublishFailed, e.to_string())
                .with_channel(channel.to_string())
                .with_cause(e.into())
        })
    }

    async fn subscribe(&self, channel: &str, handler: RawHandler) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.handlers.insert(channel.to_string(), handler);
        let tx = self
            .command_tx
            .lock()
            .clone()
            .ok_or_else(|| TransportError::new(TransportErrorCode::NotReady, "subscriber loop not running"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Subscribe(channel.to_string(), reply_tx))
            .map_err(|_| TransportError::new(TransportErrorCode::SubscribeFailed, "subscriber loop gone"))?;
        reply_rx
            .await
            .map_err(|_| TransportError::new(TransportErrorCode::SubscribeFailed, "subscriber loop gone"))?
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let Some(tx) = self.command_tx.lock().clone() else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(Command::Unsubscribe(channel.to_string(), reply_tx))
            .is_err()
        {
            return Ok(());
        }
        reply_rx
            .await
            .map_err(|_| TransportError::new(TransportErrorCode::UnsubscribeFailed, "subscriber loop gone"))?
    }

    async fn on_reconnect(&self, callback: ReconnectCallback) {
        *self.reconnect_callback.lock() = Some(callback);
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
