//! # robobus-core
//!
//! Core abstractions shared by every robobus layer.
//!
//! - **Value model**: [`Value`], the structured data every message body carries
//! - **Codec trait**: [`MessageCodec`], pluggable `Value` ⇄ bytes serialization
//! - **Addressing**: [`Endpoint`] (`tcp://host:port` or `ipc:///path`) and [`NodeId`]
//! - **Network provider**: [`NetworkProvider`], binding and connecting endpoints
//!
//! Routing, subscriptions and request tracking only ever see [`Value`]s, never
//! bytes, so a codec can be swapped without touching them.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod types;

// Codec exports
pub use codec::{CodecError, CodecKind, JsonCodec, MessageCodec, Value};

// Provider trait exports
pub use network::{BoxedStream, LinkStream, Listener, NetworkProvider, TokioNetworkProvider};

// Core type exports
pub use types::{Endpoint, EndpointParseError, NodeId, Protocol};
