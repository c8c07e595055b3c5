//! JSON payload format.
//!
//! Decoding never fails: anything that is not a JSON array degrades to an
//! empty array so callers on the script side keep working.

use super::CodecError;
use crate::value::Value;

pub fn decode(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Array(_)) => value,
        Ok(other) => {
            tracing::debug!(kind = kind_of(&other), "JSON payload is not an array");
            Value::empty_array()
        }
        Err(e) => {
            tracing::debug!(error = %e, len = bytes.len(), "Malformed JSON payload");
            Value::empty_array()
        }
    }
}

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Unencodable {
        reason: e.to_string(),
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
    }
}
