//! Payload codec for calls crossing the executor boundary.
//!
//! The format is picked once when the bridge is built; every branch on it
//! lives in [`Codec`].

mod binary;
mod json;
pub mod string_table;
pub mod text;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::value::Value;
pub use string_table::StringTable;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("value cannot be encoded: {reason}")]
    Unencodable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Binary,
    #[default]
    Json,
}

impl Format {
    pub fn from_flag(enable_binary_serialization: bool) -> Self {
        if enable_binary_serialization {
            Format::Binary
        } else {
            Format::Json
        }
    }
}

pub struct Codec {
    format: Format,
    strings: StringTable,
}

impl Codec {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            strings: StringTable::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Decode a payload.
    ///
    /// Only the binary format can fail. A binary payload whose top-level
    /// value is not an array decodes to an empty array, matching JSON.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match self.format {
            Format::Binary => match binary::decode(bytes, &self.strings)? {
                value @ Value::Array(_) => Ok(value),
                _ => {
                    tracing::debug!(len = bytes.len(), "Binary payload is not an array");
                    Ok(Value::empty_array())
                }
            },
            Format::Json => Ok(json::decode(bytes)),
        }
    }

    /// Decode call arguments, degrading every failure to an empty array.
    pub fn decode_arguments(&self, bytes: &[u8]) -> Value {
        match self.decode(bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, format = ?self.format, "Dropping undecodable arguments");
                Value::empty_array()
            }
        }
    }

    pub fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        let out = match self.format {
            Format::Binary => binary::encode(value)?,
            Format::Json => json::encode(value)?,
        };
        Ok(Bytes::from(out))
    }

    /// Release the string table. A no-op for JSON, which never fills it.
    pub fn release_strings(&self) {
        if self.format == Format::Binary {
            self.strings.release();
        }
    }
}
