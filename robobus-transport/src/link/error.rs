//! Error types for link operations.

use std::io;

use thiserror::Error;

use crate::wire::WireError;

/// Reasons a link fails or is torn down.
#[derive(Error, Debug)]
pub enum LinkError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame payload did not decode to a valid message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The framing itself is broken.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The peer closed the link, or it was closed locally.
    #[error("link closed")]
    Closed,
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
