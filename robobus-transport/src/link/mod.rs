//! Links: one framed, ordered connection between two nodes.
//!
//! Each link runs two tasks. The reader deframes inbound bytes and hands whole
//! frames to the router; the writer drains a bounded queue of outbound frames,
//! so senders wait when the socket cannot keep up instead of dropping.
//!
//! # Lifecycle
//!
//! ```text
//!  connect / accept          EOF, I/O error, decode error,
//! ─────────────────► Live ──────────────────────────────────► Removed
//!                            disconnect, node close
//! ```
//!
//! Removal is atomic with teardown: the router drops the link from its tables,
//! aborts both tasks and fails every pending request routed through it.

mod core;
mod error;

use std::fmt;

use robobus_core::NodeId;

pub(crate) use self::core::{spawn_link, LinkTasks};
pub use error::{LinkError, LinkResult};

/// Identifier of a link within one node. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// Opened by [`Node::connect`](crate::Node::connect).
    Outbound,
    /// Accepted by a listener from [`Node::bind`](crate::Node::bind).
    Inbound,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDirection::Outbound => f.write_str("outbound"),
            LinkDirection::Inbound => f.write_str("inbound"),
        }
    }
}

/// Handle to a live link, used to address calls.
///
/// A snapshot: `remote` is filled in once the first frame from the peer has
/// been seen, and [`Node::peers`](crate::Node::peers) returns fresh copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    pub(crate) link_id: LinkId,
    pub(crate) label: String,
    pub(crate) direction: LinkDirection,
    pub(crate) remote: Option<NodeId>,
}

impl PeerHandle {
    /// Link this handle addresses.
    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Endpoint dialed, or remote address for accepted links.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Which side opened the link.
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Identity of the remote node, if already known.
    pub fn remote(&self) -> Option<&NodeId> {
        self.remote.as_ref()
    }
}
