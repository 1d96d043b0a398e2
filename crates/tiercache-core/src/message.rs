//! Invalidation control messages exchanged between processes.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Operation a peer applies to its local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationOp {
    /// Drop a single key
    Evict,
    /// Drop every entry of the cache
    Clear,
}

/// Instruction to drop local-tier state for a cache.
///
/// Serialized as JSON:
///
/// ```text
/// {"cache_name":"orders#lr","key":"42","op":"evict"}
/// {"cache_name":"orders#lr","op":"clear"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub cache_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub op: InvalidationOp,
}

impl InvalidationMessage {
    pub fn evict(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: Some(key.into()),
            op: InvalidationOp::Evict,
        }
    }

    pub fn clear(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: None,
            op: InvalidationOp::Clear,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CacheError::serialization(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_wire_format() {
        let msg = InvalidationMessage::evict("orders#lr", "42");
        let json: serde_json::Value =
            serde_json::from_slice(&msg.encode().expect("encode")).expect("json");
        assert_eq!(
            json,
            serde_json::json!({"cache_name": "orders#lr", "key": "42", "op": "evict"})
        );
    }

    #[test]
    fn test_clear_omits_key() {
        let bytes = InvalidationMessage::clear("orders#lr").encode().expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(!text.contains("key"));
        assert!(text.contains(r#""op":"clear""#));
    }

    #[test]
    fn test_decode_from_peer() {
        let msg = InvalidationMessage::decode(br#"{"cache_name":"a#l","op":"clear"}"#)
            .expect("decode");
        assert_eq!(msg, InvalidationMessage::clear("a#l"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            InvalidationMessage::decode(b"not json"),
            Err(CacheError::Serialization(_))
        ));
        assert!(InvalidationMessage::decode(br#"{"cache_name":"a","op":"drop"}"#).is_err());
    }
}
