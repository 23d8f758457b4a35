//! MessagePack codec — smaller wire size than JSON at the cost of readability.

use crate::bus::codec::{decode_failed, encode_failed, Codec};
use crate::bus::value::Value;
use crate::error::CodecError;

/// Binary codec backed by `rmp-serde`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(&value.clone().into_json()).map_err(|e| encode_failed(self.name(), e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let json: serde_json::Value =
            rmp_serde::from_slice(bytes).map_err(|e| decode_failed(self.name(), e))?;
        Ok(Value::from_json(json))
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_values() {
        let codec = MsgPackCodec;
        let value = Value::from_serializable(&serde_json::json!({"a": 1, "b": [1, 2, 3]})).unwrap();
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }
}
