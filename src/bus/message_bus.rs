//! The public bus façade: owns a transport, a codec, the subscription bookkeeping, and the
//! dispatcher, and enforces that the transport only ever subscribes once per channel.

use crate::bus::codec::Codec;
use crate::bus::dispatcher::{HandlerErrorCallback, MessageDispatcher};
use crate::bus::subscription::{Handler, SubscriptionManager};
use crate::bus::transport::{BoxFuture, RawHandler, Transport};
use crate::bus::value::Value;
use crate::error::{BusOperationError, HandlerError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

pub type PublishHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Public façade over a [`Transport`] + [`Codec`] pair. Cloning a `MessageBus` shares the same
/// underlying subscriptions and transport (it is a thin handle, like the teacher's cache
/// manager handles).
#[derive(Clone)]
pub struct MessageBus {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    subscriptions: Arc<SubscriptionManager>,
    dispatcher: Arc<MessageDispatcher>,
    on_publish: Arc<parking_lot::Mutex<Option<PublishHook>>>,
}

impl MessageBus {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>) -> Self {
        let subscriptions = Arc::new(SubscriptionManager::new());
        let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&codec), Arc::clone(&subscriptions)));
        let bus = Self {
            transport,
            codec,
            subscriptions,
            dispatcher,
            on_publish: Arc::new(parking_lot::Mutex::new(None)),
        };
        bus.install_reconnect_hook();
        bus
    }

    pub fn set_on_handler_error(&self, callback: HandlerErrorCallback) {
        self.dispatcher.set_on_handler_error(callback);
    }

    pub fn set_on_publish(&self, callback: PublishHook) {
        *self.on_publish.lock() = Some(callback);
    }

    fn install_reconnect_hook(&self) {
        let transport = Arc::clone(&self.transport);
        let subscriptions = Arc::clone(&self.subscriptions);
        let dispatcher = Arc::clone(&self.dispatcher);
        let callback: crate::bus::transport::ReconnectCallback = Arc::new(move || -> BoxFuture<()> {
            let transport = Arc::clone(&transport);
            let subscriptions = Arc::clone(&subscriptions);
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                for channel in subscriptions.channels() {
                    let dispatcher = Arc::clone(&dispatcher);
                    let raw_channel = channel.clone();
                    let raw: RawHandler = Arc::new(move |payload: Vec<u8>| -> BoxFuture<()> {
                        let dispatcher = Arc::clone(&dispatcher);
                        let channel = raw_channel.clone();
                        Box::pin(async move {
                            dispatcher.dispatch(channel, payload).await;
                        })
                    });
                    if let Err(e) = transport.subscribe(&channel, raw).await {
                        warn!(channel = %channel, error = %e, "failed to re-subscribe after reconnect");
                    }
                }
            })
        });
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            transport.on_reconnect(callback).await;
        });
    }

    /// # Errors
    /// Returns [`BusOperationError`] if encoding or the underlying transport publish fails.
    pub async fn publish(&self, channel: &str, value: Value) -> Result<(), BusOperationError> {
        let bytes = self.codec.encode(&value)?;
        self.transport.publish(channel, bytes).await?;
        if let Some(hook) = self.on_publish.lock().clone() {
            hook(channel);
        }
        Ok(())
    }

    fn raw_handler_for(&self, channel: &str) -> RawHandler {
        let dispatcher = Arc::clone(&self.dispatcher);
        let channel = channel.to_string();
        Arc::new(move |payload: Vec<u8>| -> BoxFuture<()> {
            let dispatcher = Arc::clone(&dispatcher);
            let channel = channel.clone();
            Box::pin(async move {
                dispatcher.dispatch(channel, payload).await;
            })
        })
    }

    /// # Errors
    /// Returns [`BusOperationError`] if this is the channel's first handler and the transport
    /// subscribe call fails; the handler is rolled back in that case.
    pub async fn subscribe(&self, channel: &str, handler: Handler) -> Result<(), BusOperationError> {
        let (was_first, added) = self.subscriptions.add_handler(channel, Arc::clone(&handler));
        if !added {
            return Ok(());
        }
        if was_first {
            if let Err(e) = self.transport.subscribe(channel, self.raw_handler_for(channel)).await {
                self.subscriptions.remove_handler(channel, &handler);
                return Err(e.into());
            }
            debug!(channel, "bus subscribed to channel at transport level");
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`BusOperationError`] if the transport unsubscribe call fails. Unknown channels
    /// are a no-op, not an error.
    pub async fn unsubscribe(&self, channel: &str, handler: Option<&Handler>) -> Result<(), BusOperationError> {
        match handler {
            Some(handler) => {
                if !self.subscriptions.has_channel(channel) {
                    return Ok(());
                }
                let now_empty = self.subscriptions.remove_handler(channel, handler);
                if now_empty {
                    self.transport.unsubscribe(channel).await?;
                }
            }
            None => {
                if !self.subscriptions.has_channel(channel) {
                    return Ok(());
                }
                self.subscriptions.remove_channel(channel);
                self.transport.unsubscribe(channel).await?;
            }
        }
        Ok(())
    }

    /// Unsubscribe every channel (collecting but not propagating per-channel errors), then
    /// disconnect the transport.
    ///
    /// # Errors
    /// Returns [`BusOperationError`] only if the final transport disconnect fails.
    pub async fn disconnect(&self) -> Result<(), BusOperationError> {
        for channel in self.subscriptions.channels() {
            if let Err(e) = self.transport.unsubscribe(&channel).await {
                warn!(channel, error = %e, "error unsubscribing during disconnect");
            }
        }
        self.subscriptions.clear();
        self.transport.disconnect().await?;
        Ok(())
    }

    /// # Errors
    /// Returns [`BusOperationError`] if the transport connect call fails.
    pub async fn connect(&self) -> Result<(), BusOperationError> {
        self.transport.connect().await?;
        Ok(())
    }

    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.subscriptions.channels()
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }
}

/// Wraps a typed async closure as a [`Handler`], handling the `Value -> T` decode for callers.
pub fn typed_handler<T, F, Fut>(f: F) -> Handler
where
    T: serde::de::DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |value: Value| -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        match value.into_typed::<T>() {
            Ok(typed) => Box::pin(f(typed)),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    })
}
