//! Byte-level codecs for persisted values
//!
//! Codecs work on `serde_json::Value` so they can be held as trait objects;
//! [`encode_value`] and [`decode_value`] bridge typed values through it.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Byte-level codec
pub trait Codec: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Encode a value into bytes
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes back into a value
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError>;

    /// Stable string form of a value, used for content equality
    fn fingerprint(&self, value: &serde_json::Value) -> Result<String, CodecError> {
        let bytes = self.encode(value)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// JSON codec backed by `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Emit indented JSON
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        let result = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        result.map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn fingerprint(&self, value: &serde_json::Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// Encode a typed value with `codec`
pub fn encode_value<V: Serialize>(codec: &dyn Codec, value: &V) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    codec.encode(&value)
}

/// Decode a typed value with `codec`
pub fn decode_value<V: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> Result<V, CodecError> {
    let value = codec.decode(bytes)?;
    serde_json::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
}
