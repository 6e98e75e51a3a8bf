//! # robobus-transport
//!
//! Framed links, routing, publish/subscribe and request/reply for robobus
//! nodes.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Node: bind, connect, publish, subscribe, call, close │
//! ├──────────────────────────────────────────────────────┤
//! │ Router: link tables, dispatch by message kind        │
//! │   ├─ SubscriptionRegistry  (pub)                     │
//! │   └─ RequestTracker        (req / rep)               │
//! ├──────────────────────────────────────────────────────┤
//! │ Message: {"kind", "topic" | "cid", "from", "body"}   │
//! ├──────────────────────────────────────────────────────┤
//! │ MessageCodec: Value <-> bytes                        │
//! ├──────────────────────────────────────────────────────┤
//! │ Wire: [length:4 BE][payload]                         │
//! ├──────────────────────────────────────────────────────┤
//! │ Link: reader and writer tasks over TCP or IPC        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each node owns its own links, registry and tracker; nothing is shared
//! between nodes in one process.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod address;
mod config;
mod error;
pub mod link;
pub mod message;
mod node;
pub mod registry;
mod router;
pub mod tracker;
pub mod wire;

// Re-export core types
pub use robobus_core::{
    CodecError, CodecKind, Endpoint, EndpointParseError, JsonCodec, MessageCodec,
    NetworkProvider, NodeId, Protocol, TokioNetworkProvider, Value,
};

pub use address::AddressTable;
pub use config::NodeConfig;
pub use error::{BusError, HandlerError, RemoteError, RemoteErrorKind};
pub use link::{LinkDirection, LinkError, LinkId, PeerHandle};
pub use message::{CorrelationId, Message, MessageError, ReplyOutcome};
pub use node::{Node, PeriodicHandle, SubscriptionHandle, WeakNode};
pub use registry::{Publication, SubscriptionId, SubscriptionRegistry, TopicPattern};
pub use router::{Request, RequestHandler};
pub use tracker::{PendingRequestHandle, RequestTracker};
pub use wire::{FrameDecoder, WireError, DEFAULT_MAX_FRAME_SIZE};
