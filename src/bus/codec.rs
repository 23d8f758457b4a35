//! Codec: encode/decode between [`Value`] and a byte buffer.

use crate::bus::value::Value;
use crate::error::{CodecError, CodecErrorCode};
use std::fmt::Debug;

/// Default cap enforced by [`SizeValidatingCodec`] unless explicitly disabled.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Encode/decode between [`Value`] and a byte buffer.
///
/// Implementations must satisfy `decode(encode(x)) == x` for every `Value` (modulo the
/// documented erasure of explicit-undefined map entries, which this `Value` representation
/// cannot express in the first place).
pub trait Codec: Send + Sync + Debug {
    /// Encode a value to bytes.
    ///
    /// # Errors
    /// Returns [`CodecError`] with code `ENCODE_FAILED` if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes back into a value.
    ///
    /// # Errors
    /// Returns [`CodecError`] with code `DECODE_FAILED` on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// A short identifier used for logging and for the compression middleware's dispatch byte.
    fn name(&self) -> &'static str;
}

/// Wraps another codec and enforces a maximum payload size on both encode and decode.
#[derive(Debug)]
pub struct SizeValidatingCodec<C> {
    inner: C,
    max_payload_size: usize,
}

impl<C: Codec> SizeValidatingCodec<C> {
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_payload_size(inner: C, max_payload_size: usize) -> Self {
        Self {
            inner,
            max_payload_size,
        }
    }
}

impl<C: Codec> Codec for SizeValidatingCodec<C> {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let bytes = self.inner.encode(value)?;
        if bytes.len() > self.max_payload_size {
            return Err(
                CodecError::payload_too_large("encode", bytes.len(), self.max_payload_size)
                    .with_codec(self.inner.name()),
            );
        }
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.len() > self.max_payload_size {
            return Err(
                CodecError::payload_too_large("decode", bytes.len(), self.max_payload_size)
                    .with_codec(self.inner.name()),
            );
        }
        self.inner.decode(bytes)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

pub(crate) fn encode_failed(codec: &'static str, cause: impl std::error::Error + Send + Sync + 'static) -> CodecError {
    CodecError::new(CodecErrorCode::EncodeFailed, cause.to_string())
        .with_codec(codec)
        .with_cause(cause.into())
}

pub(crate) fn decode_failed(codec: &'static str, cause: impl std::error::Error + Send + Sync + 'static) -> CodecError {
    CodecError::new(CodecErrorCode::DecodeFailed, cause.to_string())
        .with_codec(codec)
        .with_cause(cause.into())
}
