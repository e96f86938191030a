//! Decoding of inbound packets into destination and content.
//!
//! The host hands packets over as the JSON form of a tuple dictionary:
//!
//! ```json
//! [{"key":0,"type":"uint","length":1,"value":7},
//!  {"key":1,"type":"string","length":6,"value":"hello"},
//!  {"key":2,"type":"bytes","length":3,"value":"AQID"}]
//! ```
//!
//! Byte tuples are base64 encoded. The destination id is the unsigned integer
//! stored under key `0`; a packet without one cannot be routed and fails to
//! decode.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dictionary::{DESTINATION_KEY, Dictionary, IntWidth, TupleValue};
use crate::module::DestinationId;

/// A decoded inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Module the packet is addressed to.
    pub destination: DestinationId,
    /// Full decoded dictionary, destination key included.
    pub content: Dictionary,
}

/// Errors raised while decoding or encoding packets.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The packet text is not valid JSON of the expected shape.
    #[error("malformed packet: {message}")]
    Malformed {
        /// Description of the parse failure.
        message: String,
        /// Underlying JSON error, when one exists.
        #[source]
        source: Option<serde_json::Error>,
    },
    /// A tuple declared a type this codec does not know.
    #[error("tuple {key} has unsupported type '{kind}'")]
    UnsupportedType {
        /// Tuple key.
        key: u32,
        /// Declared type label.
        kind: String,
    },
    /// A tuple value does not match its declared type or width.
    #[error("tuple {key} has an invalid {kind} value: {message}")]
    InvalidValue {
        /// Tuple key.
        key: u32,
        /// Declared type label.
        kind: &'static str,
        /// What was wrong with the value.
        message: String,
    },
    /// The same key appeared twice in one packet.
    #[error("tuple {key} appears more than once")]
    DuplicateKey {
        /// Repeated key.
        key: u32,
    },
    /// Key `0` is absent or not an unsigned integer.
    #[error("packet carries no unsigned destination under key 0")]
    MissingDestination,
}

impl CodecError {
    fn malformed(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(source),
        }
    }

    fn invalid_value(key: u32, kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            kind,
            message: message.into(),
        }
    }
}

/// Converts raw packets to and from dictionaries.
pub trait PacketCodec: Send + Sync {
    /// Decodes a raw inbound packet.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the packet is malformed or carries no
    /// destination.
    fn decode(&self, raw: &str) -> Result<InboundPacket, CodecError>;

    /// Encodes an outbound dictionary.
    ///
    /// The dispatch core never encodes on its own; [`DeviceConnection`]
    /// implementations call this to put transmitted content on the wire.
    ///
    /// [`DeviceConnection`]: crate::DeviceConnection
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the dictionary cannot be represented.
    fn encode(&self, content: &Dictionary) -> Result<String, CodecError>;
}

/// Codec for the JSON tuple-array form of a dictionary.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDictionaryCodec;

impl JsonDictionaryCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decodes a dictionary without requiring a destination.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the text is malformed.
    pub fn decode_dictionary(&self, raw: &str) -> Result<Dictionary, CodecError> {
        let tuples: Vec<WireTuple> = serde_json::from_str(raw).map_err(CodecError::malformed)?;
        let mut dictionary = Dictionary::new();
        for tuple in tuples {
            let key = tuple.key;
            let value = tuple.into_value()?;
            if dictionary.insert(key, value).is_some() {
                return Err(CodecError::DuplicateKey { key });
            }
        }
        Ok(dictionary)
    }
}

impl PacketCodec for JsonDictionaryCodec {
    fn decode(&self, raw: &str) -> Result<InboundPacket, CodecError> {
        let content = self.decode_dictionary(raw)?;
        let destination = content
            .unsigned(DESTINATION_KEY)
            .map(DestinationId::new)
            .ok_or(CodecError::MissingDestination)?;
        Ok(InboundPacket {
            destination,
            content,
        })
    }

    fn encode(&self, content: &Dictionary) -> Result<String, CodecError> {
        let tuples: Vec<WireTuple> = content
            .iter()
            .map(|(key, value)| WireTuple::from_value(key, value))
            .collect();
        serde_json::to_string(&tuples).map_err(CodecError::malformed)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct WireTuple {
    key: u32,
    #[serde(rename = "type")]
    kind: String,
    length: u64,
    value: Value,
}

impl WireTuple {
    fn from_value(key: u32, value: &TupleValue) -> Self {
        let (length, encoded) = match value {
            TupleValue::Bytes(bytes) => (bytes.len() as u64, Value::from(STANDARD.encode(bytes))),
            TupleValue::String(text) => (text.len() as u64, Value::from(text.as_str())),
            TupleValue::Uint { width, value } => (u64::from(width.bytes()), Value::from(*value)),
            TupleValue::Int { width, value } => (u64::from(width.bytes()), Value::from(*value)),
        };
        Self {
            key,
            kind: value.kind().to_owned(),
            length,
            value: encoded,
        }
    }

    fn into_value(self) -> Result<TupleValue, CodecError> {
        let key = self.key;
        match self.kind.as_str() {
            "uint" => {
                let width = Self::width(key, "uint", self.length)?;
                let raw = self
                    .value
                    .as_u64()
                    .ok_or_else(|| {
                        CodecError::invalid_value(key, "uint", "expected a non-negative integer")
                    })?;
                let value = u32::try_from(raw)
                    .ok()
                    .filter(|value| *value <= width.unsigned_max())
                    .ok_or_else(|| {
                        CodecError::invalid_value(
                            key,
                            "uint",
                            format!("{raw} does not fit in {} byte(s)", width.bytes()),
                        )
                    })?;
                Ok(TupleValue::Uint { width, value })
            }
            "int" => {
                let width = Self::width(key, "int", self.length)?;
                let raw = self
                    .value
                    .as_i64()
                    .ok_or_else(|| CodecError::invalid_value(key, "int", "expected an integer"))?;
                let (min, max) = width.signed_range();
                let value = i32::try_from(raw)
                    .ok()
                    .filter(|value| (min..=max).contains(value))
                    .ok_or_else(|| {
                        CodecError::invalid_value(
                            key,
                            "int",
                            format!("{raw} does not fit in {} byte(s)", width.bytes()),
                        )
                    })?;
                Ok(TupleValue::Int { width, value })
            }
            "string" => match self.value {
                Value::String(text) => Ok(TupleValue::String(text)),
                _ => Err(CodecError::invalid_value(key, "string", "expected a string")),
            },
            "bytes" => {
                let Value::String(encoded) = self.value else {
                    return Err(CodecError::invalid_value(
                        key,
                        "bytes",
                        "expected a base64 string",
                    ));
                };
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(TupleValue::Bytes)
                    .map_err(|error| CodecError::invalid_value(key, "bytes", error.to_string()))
            }
            other => Err(CodecError::UnsupportedType {
                key,
                kind: other.to_owned(),
            }),
        }
    }

    fn width(key: u32, kind: &'static str, length: u64) -> Result<IntWidth, CodecError> {
        IntWidth::from_bytes(length).ok_or_else(|| {
            CodecError::invalid_value(key, kind, format!("unsupported width {length}"))
        })
    }
}
