//! Request payload decoding.

use serde_json::Value;

use crate::errors::Result;

/// Turns a raw request payload into a JSON value.
pub trait Decoder: Send + Sync {
    /// Decode `raw`.
    fn decode(&self, raw: &[u8]) -> Result<Value>;
}

/// JSON payloads. An empty payload decodes as `null`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Value> {
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(raw)?)
    }
}
