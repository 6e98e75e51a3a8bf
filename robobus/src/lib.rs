//! # robobus
//!
//! Message bus for robots built from many cooperating processes.
//!
//! Each process runs one or more [`Node`]s. Nodes link to each other over TCP
//! or Unix domain sockets and exchange structured [`Value`]s either as
//! topic-based publications or as request/reply calls.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              robobus (this crate)                        │
//! │   Re-exports everything below                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  robobus-transport                                       │
//! │  • Node: bind, connect, publish, subscribe, call         │
//! │  • Topic patterns and subscription registry              │
//! │  • Request tracker with deadlines                        │
//! │  • Length-prefixed framing                               │
//! ├──────────────────────────────────────────────────────────┤
//! │  robobus-core                                            │
//! │  Value, MessageCodec, Endpoint, NodeId, NetworkProvider  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use robobus::{Endpoint, HandlerError, Node, NodeConfig, Request};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), robobus::BusError> {
//! let drive = Node::new("drive", NodeConfig::default());
//! let bound = drive.bind(&Endpoint::parse("tcp://127.0.0.1:7000")?).await?;
//! drive.set_request_handler(|req: Request| async move {
//!     Ok::<_, HandlerError>(json!({ "accepted": req.body }))
//! });
//!
//! let planner = Node::new("planner", NodeConfig::default());
//! let to_drive = planner.connect(&bound).await?;
//! planner.publish("planner/state", json!("ready")).await?;
//! let reply = planner.request(&to_drive, json!({ "speed": 0.5 })).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```
//!
//! ## Which Crate to Use
//!
//! | Use case | Crate |
//! |----------|-------|
//! | Applications (recommended) | `robobus` |
//! | Custom codecs or network providers | `robobus-core` |
//! | Framing, registry or tracker on their own | `robobus-transport` |
//!
//! ## Documentation
//!
//! - [`robobus_core`] - Value model, codecs, endpoints and providers
//! - [`robobus_transport`] - Nodes, routing and the wire format

#![deny(missing_docs)]

pub use robobus_core::*;
pub use robobus_transport::*;

pub use robobus_core;
pub use robobus_transport;
