//! Structured error taxonomy for the bus and cache engines.
//!
//! Every fallible public operation returns one of these types rather than a bare
//! `anyhow::Error`; each carries a machine-readable `code` where the surface calls for one, and
//! chains its cause through `#[source]` so `std::error::Error::source()` still works.

use thiserror::Error;

/// Failure codes for [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    ConnectionFailed,
    NotReady,
    PublishFailed,
    SubscribeFailed,
    UnsubscribeFailed,
}

impl std::fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::NotReady => "NOT_READY",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::SubscribeFailed => "SUBSCRIBE_FAILED",
            Self::UnsubscribeFailed => "UNSUBSCRIBE_FAILED",
        };
        f.write_str(s)
    }
}

/// An error raised by a [`crate::bus::transport::Transport`] implementation.
#[derive(Debug, Error)]
#[error("transport error [{code}]{}: {message}", channel.as_deref().map(|c| format!(" on channel {c}")).unwrap_or_default())]
pub struct TransportError {
    pub code: TransportErrorCode,
    pub channel: Option<String>,
    pub retryable: bool,
    pub message: String,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        let retryable = !matches!(code, TransportErrorCode::NotReady);
        Self {
            code,
            channel: None,
            retryable,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Failure codes for [`CodecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorCode {
    EncodeFailed,
    DecodeFailed,
    PayloadTooLarge,
    InvalidCodec,
}

impl std::fmt::Display for CodecErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EncodeFailed => "ENCODE_FAILED",
            Self::DecodeFailed => "DECODE_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InvalidCodec => "INVALID_CODEC",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("codec error [{code}]: {message}")]
pub struct CodecError {
    pub code: CodecErrorCode,
    pub codec: Option<&'static str>,
    pub operation: Option<&'static str>,
    pub size: Option<usize>,
    pub limit: Option<usize>,
    pub message: String,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl CodecError {
    pub fn new(code: CodecErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            codec: None,
            operation: None,
            size: None,
            limit: None,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn payload_too_large(operation: &'static str, size: usize, limit: usize) -> Self {
        Self {
            code: CodecErrorCode::PayloadTooLarge,
            codec: None,
            operation: Some(operation),
            size: Some(size),
            limit: Some(limit),
            message: format!("payload of {size} bytes exceeds limit of {limit} bytes"),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: &'static str) -> Self {
        self.codec = Some(codec);
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Raised when a publish exhausts all retry attempts.
#[derive(Debug, Error)]
#[error("dead letter on channel {channel}: exhausted {attempts}/{max_attempts} attempts")]
pub struct DeadLetterError {
    pub channel: String,
    pub attempts: u32,
    pub max_attempts: u32,
    #[source]
    pub cause: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueErrorCode {
    QueueFull,
}

impl std::fmt::Display for QueueErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QUEUE_FULL")
    }
}

#[derive(Debug, Error)]
#[error("queue error [{code}]: {current_size}/{max_size}")]
pub struct QueueError {
    pub code: QueueErrorCode,
    pub current_size: usize,
    pub max_size: usize,
}

/// Error surfaced by [`crate::bus::message_bus::MessageBus`] operations.
#[derive(Debug, Error)]
pub enum BusOperationError {
    #[error("bus operation '{operation}' failed")]
    Operation {
        operation: &'static str,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    DeadLetter(#[from] DeadLetterError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl BusOperationError {
    pub fn operation(
        operation: &'static str,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Operation {
            operation,
            cause: cause.into(),
        }
    }
}

/// Error reported (never propagated) when a single handler fails during dispatch.
#[derive(Debug, Error)]
#[error("handler error on channel {channel}: {cause}")]
pub struct HandlerError {
    pub channel: String,
    pub cause: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorCode {
    StoreNotFound,
    DriverNotFound,
    LoaderError,
    NotConnected,
}

impl std::fmt::Display for CacheErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StoreNotFound => "STORE_NOT_FOUND",
            Self::DriverNotFound => "DRIVER_NOT_FOUND",
            Self::LoaderError => "LOADER_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("cache error [{code}]{}", context.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct CacheError {
    pub code: CacheErrorCode,
    pub context: Option<String>,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl CacheError {
    pub fn new(code: CacheErrorCode) -> Self {
        Self {
            code,
            context: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn loader_error(cause: anyhow::Error) -> Self {
        Self::new(CacheErrorCode::LoaderError).with_cause(cause)
    }
}
