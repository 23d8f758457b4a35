//! Canonical JSON codec.

use crate::bus::codec::{decode_failed, encode_failed, Codec};
use crate::bus::value::Value;
use crate::error::CodecError;

/// Text codec backed by `serde_json`. The default for new buses.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&value.clone().into_json()).map_err(|e| encode_failed(self.name(), e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| decode_failed(self.name(), e))?;
        Ok(Value::from_json(json))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_values() {
        let codec = JsonCodec;
        let value = Value::from_serializable(&serde_json::json!({
            "id": 1,
            "tags": ["a", "b"],
            "nested": {"ok": true, "ratio": 1.5},
        }))
        .unwrap();
        let bytes = codec.encode(&value).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn rejects_malformed_input() {
        let codec = JsonCodec;
        assert!(codec.decode(b"{not json").is_err());
    }
}
