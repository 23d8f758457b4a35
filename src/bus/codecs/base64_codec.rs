//! Base64 text wrapper codec — obfuscation only, not a security control.

use crate::bus::codec::{decode_failed, Codec};
use crate::bus::value::Value;
use crate::error::CodecError;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Wraps an inner codec and Base64-encodes its output. ~33% larger than the raw encoding;
/// useful only for transports that mishandle raw binary (e.g. text-only channels).
#[derive(Debug)]
pub struct Base64Codec<C> {
    inner: C,
}

impl<C: Codec> Base64Codec<C> {
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Codec> Codec for Base64Codec<C> {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let raw = self.inner.encode(value)?;
        Ok(STANDARD.encode(raw).into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let raw = STANDARD
            .decode(bytes)
            .map_err(|e| decode_failed(self.name(), e))?;
        self.inner.decode(&raw)
    }

    fn name(&self) -> &'static str {
        "base64"
    }
}
