//! Lazily instantiates named buses from a registry and proxies convenience operations to a
//! configured default.

use crate::bus::message_bus::MessageBus;
use crate::bus::subscription::Handler;
use crate::bus::value::Value;
use crate::error::BusOperationError;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusManagerError {
    #[error("no transport registered under the name '{0}'")]
    UnknownTransport(String),
    #[error("no default bus configured and no name was given")]
    NoDefault,
    #[error(transparent)]
    Bus(#[from] BusOperationError),
}

/// A factory for a named bus, invoked lazily on first `use_bus`.
pub type BusFactory = Arc<dyn Fn() -> MessageBus + Send + Sync>;

#[derive(Default)]
pub struct BusManager {
    factories: DashMap<String, BusFactory>,
    cache: DashMap<String, MessageBus>,
    default: parking_lot::Mutex<Option<String>>,
}

impl BusManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, factory: BusFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn set_default(&self, name: impl Into<String>) {
        *self.default.lock() = Some(name.into());
    }

    /// Resolve and cache the bus for `name`, or the configured default when `name` is `None`.
    ///
    /// # Errors
    /// Returns [`BusManagerError::NoDefault`] when `name` is `None` and no default is set, or
    /// [`BusManagerError::UnknownTransport`] when `name` is not registered.
    pub fn use_bus(&self, name: Option<&str>) -> Result<MessageBus, BusManagerError> {
        let name = match name {
            Some(n) => n.to_string(),
            None => self
                .default
                .lock()
                .clone()
                .ok_or(BusManagerError::NoDefault)?,
        };
        if let Some(bus) = self.cache.get(&name) {
            return Ok(bus.clone());
        }
        let factory = self
            .factories
            .get(&name)
            .ok_or_else(|| BusManagerError::UnknownTransport(name.clone()))?;
        let bus = factory();
        self.cache.insert(name, bus.clone());
        Ok(bus)
    }

    /// # Errors
    /// See [`BusManager::use_bus`]; also propagates [`BusOperationError`] from `connect`.
    pub async fn start(&self, name: Option<&str>) -> Result<(), BusManagerError> {
        match name {
            Some(n) => self.use_bus(Some(n))?.connect().await.map_err(Into::into),
            None => {
                let names: Vec<_> = self.cache.iter().map(|e| e.key().clone()).collect();
                for n in names {
                    self.use_bus(Some(&n))?.connect().await?;
                }
                Ok(())
            }
        }
    }

    /// Disconnect one named bus, or every cached bus (clearing the cache) when `name` is `None`.
    ///
    /// # Errors
    /// Propagates [`BusOperationError`] from the underlying `disconnect` calls.
    pub async fn stop(&self, name: Option<&str>) -> Result<(), BusManagerError> {
        match name {
            Some(n) => {
                if let Some((_, bus)) = self.cache.remove(n) {
                    bus.disconnect().await?;
                }
                Ok(())
            }
            None => {
                let entries: Vec<_> = self.cache.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
                self.cache.clear();
                for (_, bus) in entries {
                    bus.disconnect().await?;
                }
                Ok(())
            }
        }
    }

    /// # Errors
    /// See [`BusManager::use_bus`].
    pub async fn publish(&self, channel: &str, value: Value) -> Result<(), BusManagerError> {
        self.use_bus(None)?.publish(channel, value).await.map_err(Into::into)
    }

    /// # Errors
    /// See [`BusManager::use_bus`].
    pub async fn subscribe(&self, channel: &str, handler: Handler) -> Result<(), BusManagerError> {
        self.use_bus(None)?.subscribe(channel, handler).await.map_err(Into::into)
    }

    /// # Errors
    /// See [`BusManager::use_bus`].
    pub async fn unsubscribe(&self, channel: &str, handler: Option<&Handler>) -> Result<(), BusManagerError> {
        self.use_bus(None)?.unsubscribe(channel, handler).await.map_err(Into::into)
    }
}
