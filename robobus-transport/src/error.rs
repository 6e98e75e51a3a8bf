//! Error types for robobus nodes.

use std::io;
use std::time::Duration;

use robobus_core::{CodecError, EndpointParseError};
use serde::{Deserialize, Serialize};

use crate::link::LinkError;
use crate::message::{CorrelationId, MessageError};
use crate::wire::WireError;

/// Errors returned by [`Node`](crate::Node) operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Link-level I/O failure. Terminal for that link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Payload could not be encoded or decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Details about the failure.
        message: String,
    },

    /// No reply arrived within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with a failure.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The request was cancelled because the node closed.
    #[error("request cancelled")]
    Cancelled,

    /// The link carrying the request closed before a reply arrived.
    #[error("link closed")]
    LinkClosed,

    /// The node is closed.
    #[error("node closed")]
    Closed,

    /// Too many requests are already in flight.
    #[error("too many pending requests (max {max})")]
    TooManyPending {
        /// Configured maximum.
        max: usize,
    },

    /// A correlation identifier is already pending.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(CorrelationId),

    /// No live link to the named node.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The address table has no entry for the name.
    #[error("no address for peer '{0}'")]
    UnknownAddress(String),

    /// Topic or pattern is empty or uses the reserved `$` prefix.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The rejected topic.
        topic: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Encoded message exceeds the configured frame bound.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] EndpointParseError),
}

impl From<CodecError> for BusError {
    fn from(err: CodecError) -> Self {
        BusError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<MessageError> for BusError {
    fn from(err: MessageError) -> Self {
        BusError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<WireError> for BusError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::FrameTooLarge { size, max } => BusError::FrameTooLarge { size, max },
            other => BusError::Decode {
                message: other.to_string(),
            },
        }
    }
}

impl From<LinkError> for BusError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Io(e) => BusError::Io(e),
            LinkError::Decode(message) => BusError::Decode { message },
            LinkError::Wire(e) => e.into(),
            LinkError::Closed => BusError::LinkClosed,
        }
    }
}

/// Category of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The peer has no request handler registered.
    NoHandler,
    /// The peer's handler returned an error.
    HandlerFailed,
    /// The peer was already running as many handlers as it allows.
    Overloaded,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::NoHandler => write!(f, "no handler"),
            RemoteErrorKind::HandlerFailed => write!(f, "handler failed"),
            RemoteErrorKind::Overloaded => write!(f, "overloaded"),
        }
    }
}

/// Failure reported by a peer inside a reply.
///
/// Distinct from [`BusError::Timeout`] and [`BusError::Io`]: the peer
/// answered, but refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Failure category.
    pub kind: RemoteErrorKind,
    /// Human-readable details.
    pub message: String,
}

impl RemoteError {
    /// The peer had no request handler.
    pub fn no_handler() -> Self {
        Self {
            kind: RemoteErrorKind::NoHandler,
            message: "no request handler registered".to_string(),
        }
    }

    /// The peer refused to start another handler.
    pub fn overloaded(limit: usize) -> Self {
        Self {
            kind: RemoteErrorKind::Overloaded,
            message: format!("{} requests already being handled", limit),
        }
    }

    /// The peer's handler failed with a message.
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::HandlerFailed,
            message: message.into(),
        }
    }
}

/// Error a request handler returns to refuse a request.
///
/// Travels back to the caller as a [`RemoteError`] of kind
/// [`RemoteErrorKind::HandlerFailed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<HandlerError> for RemoteError {
    fn from(err: HandlerError) -> Self {
        RemoteError::handler_failed(err.message)
    }
}
