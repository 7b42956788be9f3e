// SPDX-License-Identifier: MIT OR Apache-2.0
//! Body value tree with binary leaves and side-map encoding.
//!
//! Recorded payloads are stored as JSON, but live payloads may contain raw
//! bytes (gRPC message fields, HTTP bodies). Bodies are therefore modeled
//! as a tree whose leaves may be `Binary`; the encoder substitutes a
//! sentinel string at each binary leaf and emits a parallel buffer map
//! keyed by dotted path, and the decoder reconstructs the original tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Sentinel stored in place of a binary leaf inside the JSON form.
pub const BUFFER_SENTINEL: &str = "__drift_buffer__";

/// Encode raw bytes to the storage form.
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode the storage form back to raw bytes.
pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>, ValueError> {
    BASE64
        .decode(encoded)
        .map_err(|source| ValueError::InvalidBase64 {
            path: String::new(),
            source,
        })
}

/// Errors produced while decoding a stored body.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The JSON form referenced a buffer path missing from the side map.
    #[error("buffer map is missing an entry for path '{path}'")]
    MissingBuffer {
        /// Dotted path of the sentinel with no buffer.
        path: String,
    },
    /// A buffer map entry was not valid base64.
    #[error("invalid base64 at path '{path}'")]
    InvalidBase64 {
        /// Dotted path of the malformed entry.
        path: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },
}

/// Parallel side map of binary leaves, keyed by dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferMap(pub BTreeMap<String, String>);

impl BufferMap {
    /// Whether no binary leaves were present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A structured body whose leaves may be raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (kept in JSON representation).
    Number(serde_json::Number),
    /// UTF-8 string.
    String(String),
    /// Raw bytes; substituted by [`BUFFER_SENTINEL`] in the JSON form.
    Binary(Vec<u8>),
    /// Ordered sequence.
    Array(Vec<BodyValue>),
    /// Key-value map with deterministic ordering.
    Object(BTreeMap<String, BodyValue>),
}

impl BodyValue {
    /// Build from plain JSON (no binary leaves).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.clone()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Encode for storage: the JSON form plus the side map of buffers.
    #[must_use]
    pub fn encode_with_buffers(&self) -> (serde_json::Value, BufferMap) {
        let mut buffers = BufferMap::default();
        let json = encode_node(self, &mut String::new(), &mut buffers);
        (json, buffers)
    }

    /// Reconstruct the original tree from the JSON form and side map.
    pub fn decode_with_buffers(
        value: &serde_json::Value,
        buffers: &BufferMap,
    ) -> Result<Self, ValueError> {
        decode_node(value, &mut String::new(), buffers)
    }
}

fn push_segment(path: &mut String, segment: &str) -> usize {
    let prev = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
    prev
}

fn encode_node(node: &BodyValue, path: &mut String, buffers: &mut BufferMap) -> serde_json::Value {
    match node {
        BodyValue::Null => serde_json::Value::Null,
        BodyValue::Bool(b) => serde_json::Value::Bool(*b),
        BodyValue::Number(n) => serde_json::Value::Number(n.clone()),
        BodyValue::String(s) => serde_json::Value::String(s.clone()),
        BodyValue::Binary(bytes) => {
            buffers.0.insert(path.clone(), encode_bytes(bytes));
            serde_json::Value::String(BUFFER_SENTINEL.to_string())
        }
        BodyValue::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let prev = push_segment(path, &i.to_string());
                    let encoded = encode_node(item, path, buffers);
                    path.truncate(prev);
                    encoded
                })
                .collect(),
        ),
        BodyValue::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let prev = push_segment(path, k);
                    let encoded = encode_node(v, path, buffers);
                    path.truncate(prev);
                    (k.clone(), encoded)
                })
                .collect(),
        ),
    }
}

fn decode_node(
    value: &serde_json::Value,
    path: &mut String,
    buffers: &BufferMap,
) -> Result<BodyValue, ValueError> {
    Ok(match value {
        serde_json::Value::Null => BodyValue::Null,
        serde_json::Value::Bool(b) => BodyValue::Bool(*b),
        serde_json::Value::Number(n) => BodyValue::Number(n.clone()),
        serde_json::Value::String(s) if s == BUFFER_SENTINEL => {
            let encoded = buffers.0.get(path.as_str()).ok_or(ValueError::MissingBuffer {
                path: path.clone(),
            })?;
            let bytes = BASE64
                .decode(encoded)
                .map_err(|source| ValueError::InvalidBase64 {
                    path: path.clone(),
                    source,
                })?;
            BodyValue::Binary(bytes)
        }
        serde_json::Value::String(s) => BodyValue::String(s.clone()),
        serde_json::Value::Array(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let prev = push_segment(path, &i.to_string());
                decoded.push(decode_node(item, path, buffers)?);
                path.truncate(prev);
            }
            BodyValue::Array(decoded)
        }
        serde_json::Value::Object(map) => {
            let mut decoded = BTreeMap::new();
            for (k, v) in map {
                let prev = push_segment(path, k);
                decoded.insert(k.clone(), decode_node(v, path, buffers)?);
                path.truncate(prev);
            }
            BodyValue::Object(decoded)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree_with_buffers() -> BodyValue {
        BodyValue::Object(BTreeMap::from([
            ("id".to_string(), BodyValue::String("user-1".into())),
            (
                "avatar".to_string(),
                BodyValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]),
            ),
            (
                "documents".to_string(),
                BodyValue::Array(vec![
                    BodyValue::Binary(vec![1, 2, 3]),
                    BodyValue::String("plain".into()),
                ]),
            ),
        ]))
    }

    #[test]
    fn binary_leaves_become_sentinels_with_dotted_paths() {
        let (json, buffers) = tree_with_buffers().encode_with_buffers();
        assert_eq!(json["avatar"], BUFFER_SENTINEL);
        assert_eq!(json["documents"][0], BUFFER_SENTINEL);
        assert_eq!(json["documents"][1], "plain");
        assert_eq!(buffers.0.len(), 2);
        assert!(buffers.0.contains_key("avatar"));
        assert!(buffers.0.contains_key("documents.0"));
    }

    #[test]
    fn roundtrip_restores_every_binary_field() {
        let original = tree_with_buffers();
        let (json, buffers) = original.encode_with_buffers();
        let restored = BodyValue::decode_with_buffers(&json, &buffers).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn sentinel_without_buffer_entry_is_an_error() {
        let json = json!({"payload": BUFFER_SENTINEL});
        let err = BodyValue::decode_with_buffers(&json, &BufferMap::default()).unwrap_err();
        assert!(matches!(err, ValueError::MissingBuffer { path } if path == "payload"));
    }

    #[test]
    fn plain_json_roundtrips_without_buffers() {
        let source = json!({"a": [1, 2, {"b": null, "c": true}], "d": "text"});
        let tree = BodyValue::from_json(&source);
        let (encoded, buffers) = tree.encode_with_buffers();
        assert!(buffers.is_empty());
        assert_eq!(encoded, source);
    }

    #[test]
    fn byte_helpers_roundtrip() {
        let body = b"{\"token\":\"T\"}";
        let encoded = encode_bytes(body);
        assert_eq!(decode_bytes(&encoded).unwrap(), body);
    }
}
