//! Representations beacons arrive in from push delivery, fetches and storage.
//!
//! Byte arrays show up as native numeric arrays, base64 strings,
//! `{"type":"Buffer","data":[...]}` wrappers or index-keyed objects
//! (`{"0":1,"1":2}`). Everything here folds those into `Vec<u8>`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::{Map, Value};

/// Extracts a byte array from any accepted wire representation.
pub fn bytes_from_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Array(items) => items.iter().map(byte_from_value).collect(),
        Value::String(encoded) => STANDARD.decode(encoded.trim()).ok(),
        Value::Object(map) => bytes_from_object(map),
        _ => None,
    }
}

fn byte_from_value(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|b| u8::try_from(b).ok())
}

fn bytes_from_object(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if let Some(data) = map.get("data") {
        return match map.get("type").and_then(Value::as_str) {
            Some("Buffer") | None => bytes_from_value(data),
            Some(_) => None,
        };
    }

    // Typed arrays serialized as plain objects keyed by position
    let mut indexed = Vec::with_capacity(map.len());
    for (key, value) in map {
        let position: usize = key.parse().ok()?;
        indexed.push((position, byte_from_value(value)?));
    }
    indexed.sort_unstable_by_key(|&(position, _)| position);
    if indexed.iter().enumerate().any(|(i, &(position, _))| i != position) {
        return None;
    }
    Some(indexed.into_iter().map(|(_, byte)| byte).collect())
}

/// Parses a serialized basis: either a JSON array (`"[2,3,5]"`) or a
/// comma-separated list (`"2,3,5"`). Returns `None` when nothing usable is left.
pub fn parse_basis(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim();
    let values: Vec<u64> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).ok()?
    } else {
        trimmed
            .split(',')
            .map(|part| part.trim().parse().ok())
            .collect::<Option<Vec<u64>>>()?
    };

    let basis: Vec<u64> = values.into_iter().filter(|&p| p >= 2).collect();
    if basis.is_empty() {
        None
    } else {
        Some(basis)
    }
}

/// Serde adapter: bytes are written as base64 and read from any wire form.
pub mod base64_bytes {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        bytes_from_value(&value)
            .ok_or_else(|| D::Error::custom("unrecognised byte array representation"))
    }
}

/// Serde adapter for the serialized prime list. Arrays are folded into their
/// JSON text so an unparseable value can still be carried and reported later.
pub mod prime_list {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(raw: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match raw {
            Some(text) => serializer.serialize_some(text),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text)),
            Value::Number(n) => Ok(Some(n.to_string())),
            array @ Value::Array(_) => Ok(Some(array.to_string())),
            Value::Bool(_) | Value::Object(_) => {
                Err(D::Error::custom("prime indices must be a list or string"))
            }
        }
    }
}

/// Serde adapter for metadata, which some producers send as an embedded
/// object instead of a JSON string.
pub mod metadata_text {
    use super::*;

    pub fn serialize<S: Serializer>(raw: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match raw {
            Some(text) => serializer.serialize_some(text),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        })
    }
}
