//! Pluggable message serialization.
//!
//! The [`MessageCodec`] trait turns a structured [`Value`] into bytes and back.
//! robobus ships [`JsonCodec`]; a binary format can be added later by
//! implementing the trait and extending [`CodecKind`].
//!
//! # Example
//!
//! ```rust
//! use robobus_core::{JsonCodec, MessageCodec};
//! use serde_json::json;
//!
//! let codec = JsonCodec;
//! let value = json!({"joint": "elbow", "angle": 1.25});
//!
//! let bytes = codec.encode(&value).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), value);
//! ```

use std::fmt;
use std::sync::Arc;

/// Structured value carried in message bodies.
///
/// Null, booleans, numbers, strings, ordered sequences and string-keyed maps:
/// everything a JSON document can hold.
pub type Value = serde_json::Value;

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Pluggable serialization format for [`Value`]s.
///
/// Implementations must satisfy the round-trip law
/// `decode(encode(v)) == v` for every value they accept, and must never
/// return a partially decoded value: malformed input is a
/// [`CodecError::Decode`].
///
/// The trait is object safe so a node can hold its codec as
/// `Arc<dyn MessageCodec>` chosen at runtime.
pub trait MessageCodec: Send + Sync + fmt::Debug + 'static {
    /// Encode a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` on malformed input.
    fn decode(&self, buf: &[u8]) -> Result<Value, CodecError>;
}

/// JSON codec using serde_json.
///
/// The default codec. Human readable on the wire, which makes it easy to
/// debug a bus with a packet capture.
///
/// ```rust
/// use robobus_core::{JsonCodec, MessageCodec};
/// use serde_json::json;
///
/// let bytes = JsonCodec.encode(&json!({"seq": 1})).unwrap();
/// assert_eq!(&bytes, br#"{"seq":1}"#);
/// ```
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode(&self, buf: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// Codec selection for a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecKind {
    /// [`JsonCodec`].
    #[default]
    Json,
}

impl CodecKind {
    /// Instantiate the selected codec.
    pub fn build(self) -> Arc<dyn MessageCodec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}
