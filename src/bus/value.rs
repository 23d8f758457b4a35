//! The serializable value carried across the bus.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A closed-form serializable value.
///
/// Mirrors the shape of `serde_json::Value` but keeps map keys in insertion order (via
/// `IndexMap`) so encodes are deterministic, which matters for content-hash based message ids
/// in the retry queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert any `Serialize` payload into a `Value` by round-tripping through `serde_json`.
    ///
    /// # Errors
    /// Returns an error if `T`'s `Serialize` impl fails or produces a shape this enum can't
    /// represent (e.g. a non-string map key).
    pub fn from_serializable<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        let json = serde_json::to_value(value)?;
        Ok(Self::from_json(json))
    }

    /// Convert this `Value` back into a typed payload via `serde_json`.
    ///
    /// # Errors
    /// Returns an error if the shape does not match `T`'s `Deserialize` impl.
    pub fn into_typed<T: serde::de::DeserializeOwned>(self) -> anyhow::Result<T> {
        let json = self.into_json();
        Ok(serde_json::from_value(json)?)
    }

    pub(crate) fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(a) => Self::Array(a.into_iter().map(Self::from_json).collect()),
            serde_json::Value::Object(o) => {
                let mut map = IndexMap::with_capacity(o.len());
                for (k, v) in o {
                    map.insert(k, Self::from_json(v));
                }
                Self::Map(map)
            }
        }
    }

    pub(crate) fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Int(i) => serde_json::Value::Number(i.into()),
            Self::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s),
            Self::Array(a) => serde_json::Value::Array(a.into_iter().map(Value::into_json).collect()),
            Self::Map(m) => {
                let mut obj = serde_json::Map::with_capacity(m.len());
                for (k, v) in m {
                    obj.insert(k, v.into_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: u64,
        name: String,
    }

    #[test]
    fn round_trips_through_value() {
        let p = Payload { id: 1, name: "A".to_string() };
        let v = Value::from_serializable(&p).unwrap();
        let back: Payload = v.into_typed().unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn preserves_map_insertion_order() {
        let v = Value::from_serializable(&serde_json::json!({"b": 1, "a": 2})).unwrap();
        let map = v.as_map().unwrap();
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
