//! Wire message model.
//!
//! Every frame decodes to one [`Message`]:
//!
//! ```text
//! {"kind": "pub", "topic": "imu/accel", "from": "imu-812-1a2b3c4d", "body": ...}
//! {"kind": "req", "cid": "17", "from": "planner-90-00ff00ff", "body": ...}
//! {"kind": "rep", "cid": "17", "from": "arm-91-deadbeef", "body": {"ok": ...}}
//! ```
//!
//! `topic` is required for `pub`; `cid` is required for `req`/`rep` and must be
//! absent for `pub`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use robobus_core::{NodeId, Value};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Reserved control topic carrying interest announcements.
pub const INTEREST_TOPIC: &str = "$bus/interest";

/// Topics starting with this prefix are reserved for the bus itself.
pub const RESERVED_PREFIX: char = '$';

/// Opaque token pairing a request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates correlation ids unique for the lifetime of one node.
#[derive(Debug)]
pub struct CorrelationIdFactory {
    next: AtomicU64,
}

impl CorrelationIdFactory {
    /// Create a factory starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next identifier.
    pub fn next_id(&self) -> CorrelationId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CorrelationId(n.to_string())
    }
}

impl Default for CorrelationIdFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded wire message.
///
/// Never mutated after decode; the router consumes it immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    /// Topic publication.
    #[serde(rename = "pub")]
    Publish {
        /// Topic the body was published on.
        topic: String,
        /// Sender identity.
        from: NodeId,
        /// Published value.
        body: Value,
    },
    /// Addressed request expecting a reply.
    #[serde(rename = "req")]
    Request {
        /// Correlation id the reply will carry.
        cid: CorrelationId,
        /// Sender identity.
        from: NodeId,
        /// Request payload.
        body: Value,
    },
    /// Reply to a request.
    #[serde(rename = "rep")]
    Reply {
        /// Correlation id of the request being answered.
        cid: CorrelationId,
        /// Sender identity.
        from: NodeId,
        /// Encoded [`ReplyOutcome`].
        body: Value,
    },
}

/// Wire-shape violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The decoded value is not a map.
    #[error("message is not a map")]
    NotAMap,

    /// `kind` is missing or not one of `pub`, `req`, `rep`.
    #[error("unknown message kind: {kind}")]
    UnknownKind {
        /// The offending kind, or `<missing>`.
        kind: String,
    },

    /// A field that must be absent for this kind is present.
    #[error("field '{field}' not allowed on '{kind}' messages")]
    ForbiddenField {
        /// Message kind.
        kind: &'static str,
        /// The forbidden field.
        field: &'static str,
    },

    /// Required fields missing or mistyped.
    #[error("malformed message: {message}")]
    Malformed {
        /// Details from the deserializer.
        message: String,
    },
}

impl Message {
    /// Sender identity.
    pub fn sender(&self) -> &NodeId {
        match self {
            Message::Publish { from, .. }
            | Message::Request { from, .. }
            | Message::Reply { from, .. } => from,
        }
    }

    /// Wire name of the kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Publish { .. } => "pub",
            Message::Request { .. } => "req",
            Message::Reply { .. } => "rep",
        }
    }

    /// Validate and convert a decoded value.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] when the value breaks the presence rules.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let map = value.as_object().ok_or(MessageError::NotAMap)?;
        let kind = match map.get("kind").and_then(Value::as_str) {
            Some(kind @ ("pub" | "req" | "rep")) => kind,
            Some(other) => {
                return Err(MessageError::UnknownKind {
                    kind: other.to_string(),
                })
            }
            None => {
                return Err(MessageError::UnknownKind {
                    kind: "<missing>".to_string(),
                })
            }
        };
        if kind == "pub" && map.contains_key("cid") {
            return Err(MessageError::ForbiddenField {
                kind: "pub",
                field: "cid",
            });
        }

        serde_json::from_value(value).map_err(|e| MessageError::Malformed {
            message: e.to_string(),
        })
    }

    /// Convert to the structured value handed to the codec.
    pub fn into_value(self) -> Value {
        // Serializing a plain enum of strings and values cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Outcome carried in a reply body: `{"ok": value}` or `{"err": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOutcome {
    /// The handler produced a value.
    Ok(Value),
    /// The peer refused.
    Err(RemoteError),
}

impl ReplyOutcome {
    /// Parse a reply body.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` when the body is neither shape.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        serde_json::from_value(value).map_err(|e| MessageError::Malformed {
            message: e.to_string(),
        })
    }

    /// Encode as a reply body.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            ReplyOutcome::Ok(value) => Ok(value),
            ReplyOutcome::Err(err) => Err(err),
        }
    }
}

/// Body of an [`INTEREST_TOPIC`] announcement.
///
/// `version` increases with every change of the sender's pattern set, so an
/// announcement overtaken by a newer one is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestAnnouncement {
    /// Monotonic version of the pattern set.
    pub version: u64,
    /// Patterns in their textual form.
    pub patterns: Vec<String>,
}
