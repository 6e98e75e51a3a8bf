//! Core types for addressing.
//!
//! - [`Endpoint`]: where a link connects, `tcp://host:port` or `ipc:///path`
//! - [`NodeId`]: process-unique identity of a node, carried as the sender of
//!   every message

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport protocol of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Networked stream socket.
    Tcp,
    /// Same-host stream socket (Unix domain socket).
    Ipc,
}

impl Protocol {
    /// URI scheme used in the textual form.
    pub const fn scheme(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Ipc => "ipc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Destination of a link: protocol plus location.
///
/// The location is `host:port` for [`Protocol::Tcp`] and a filesystem path for
/// [`Protocol::Ipc`]. Endpoints are immutable once constructed.
///
/// # Examples
///
/// ```
/// use robobus_core::{Endpoint, Protocol};
///
/// let ep = Endpoint::parse("tcp://127.0.0.1:9000").unwrap();
/// assert_eq!(ep.protocol(), Protocol::Tcp);
/// assert_eq!(ep.location(), "127.0.0.1:9000");
///
/// let ep: Endpoint = "ipc:///tmp/arm.sock".parse().unwrap();
/// assert_eq!(ep.location(), "/tmp/arm.sock");
/// assert_eq!(ep.to_string(), "ipc:///tmp/arm.sock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    protocol: Protocol,
    location: String,
}

impl Endpoint {
    /// TCP endpoint for `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            location: format!("{}:{}", host.into(), port),
        }
    }

    /// IPC endpoint for a socket path.
    pub fn ipc(path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Ipc,
            location: path.into(),
        }
    }

    /// Parse `tcp://host:port` or `ipc:///path`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] when the scheme is unknown, the location
    /// is empty, or a TCP location lacks a valid port.
    pub fn parse(s: &str) -> Result<Self, EndpointParseError> {
        let (scheme, location) = s
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(s.to_string()))?;

        if location.is_empty() {
            return Err(EndpointParseError::EmptyLocation);
        }

        match scheme {
            "tcp" => {
                let (host, port) = location
                    .rsplit_once(':')
                    .ok_or(EndpointParseError::MissingPort)?;
                if host.is_empty() {
                    return Err(EndpointParseError::EmptyLocation);
                }
                port.parse::<u16>()
                    .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;
                Ok(Self {
                    protocol: Protocol::Tcp,
                    location: location.to_string(),
                })
            }
            "ipc" => Ok(Self::ipc(location)),
            other => Err(EndpointParseError::UnknownScheme(other.to_string())),
        }
    }

    /// Transport protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `host:port` or socket path.
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.location)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing an [`Endpoint`] from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    /// No `scheme://` prefix.
    #[error("missing scheme in endpoint '{0}'")]
    MissingScheme(String),
    /// Scheme other than `tcp` or `ipc`.
    #[error("unknown endpoint scheme '{0}'")]
    UnknownScheme(String),
    /// Nothing after the scheme, or an empty host.
    #[error("empty endpoint location")]
    EmptyLocation,
    /// TCP location without `:port`.
    #[error("missing port")]
    MissingPort,
    /// Port is not a valid u16.
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Process-unique node identity.
///
/// Used as the `from` field of every message a node sends. Peers learn it
/// from the first frame they receive on a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generate an identity from a human-readable name.
    ///
    /// The result is `name-pid-suffix` where the suffix is random, so two nodes
    /// with the same name in one process still get distinct identities.
    pub fn generate(name: &str) -> Self {
        let suffix: u32 = rand::random();
        Self(format!("{}-{}-{:08x}", name, std::process::id(), suffix))
    }

    /// Wrap an identity received from the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
