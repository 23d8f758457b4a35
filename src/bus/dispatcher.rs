//! Decodes raw bytes for a channel and fans out to every registered handler, isolating
//! failures so one handler's error never prevents the others from running.

use crate::bus::codec::Codec;
use crate::bus::subscription::{Handler, SubscriptionManager};
use crate::error::HandlerError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub type HandlerErrorCallback = Arc<dyn Fn(HandlerError) + Send + Sync>;

pub struct MessageDispatcher {
    codec: Arc<dyn Codec>,
    subscriptions: Arc<SubscriptionManager>,
    on_handler_error: parking_lot::Mutex<Option<HandlerErrorCallback>>,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            codec,
            subscriptions,
            on_handler_error: parking_lot::Mutex::new(None),
        }
    }

    pub fn set_on_handler_error(&self, callback: HandlerErrorCallback) {
        *self.on_handler_error.lock() = Some(callback);
    }

    /// Decode `payload` and fan it out to every handler registered for `channel`. All handlers
    /// run concurrently; their completion order and individual failures are invisible to the
    /// caller, which only sees that dispatch happened.
    pub fn dispatch(&self, channel: String, payload: Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let codec = Arc::clone(&self.codec);
        let handlers = self.subscriptions.handlers(&channel);
        let on_error = self.on_handler_error.lock().clone();
        Box::pin(async move {
            if handlers.is_empty() {
                return;
            }
            let value = match codec.decode(&payload) {
                Ok(v) => v,
                Err(e) => {
                    debug!(channel = %channel, error = %e, "dropping message: decode failed");
                    if let Some(cb) = &on_error {
                        cb(HandlerError {
                            channel: channel.clone(),
                            cause: anyhow::Error::new(e),
                        });
                    }
                    return;
                }
            };

            let futures = handlers.into_iter().map(|handler: Handler| {
                let value = value.clone();
                let channel = channel.clone();
                async move { (channel, handler(value).await) }
            });

            for (channel, result) in futures_util::future::join_all(futures).await {
                if let Err(cause) = result {
                    if let Some(cb) = &on_error {
                        cb(HandlerError { channel, cause });
                    }
                }
            }
        })
    }
}
