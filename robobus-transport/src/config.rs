//! Node configuration.

use std::time::Duration;

use robobus_core::{CodecKind, Endpoint};

use crate::wire::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for a [`Node`](crate::Node).
///
/// | Option | Default |
/// |--------|---------|
/// | `request_timeout` | 5 s |
/// | `max_pending_requests` | 1024 |
/// | `max_concurrent_handlers` | 256 |
/// | `max_frame_size` | 1 MiB |
/// | `send_queue_capacity` | 256 frames per link |
/// | `connect_timeout` | 5 s |
/// | `codec` | [`CodecKind::Json`] |
/// | `peers` | empty |
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Deadline applied by [`Node::request`](crate::Node::request).
    pub request_timeout: Duration,

    /// Maximum number of requests in flight at once.
    pub max_pending_requests: usize,

    /// Inbound requests handled at once, across all links.
    ///
    /// Requests beyond this are refused with
    /// [`RemoteErrorKind::Overloaded`](crate::RemoteErrorKind::Overloaded)
    /// instead of queued.
    pub max_concurrent_handlers: usize,

    /// Largest encoded message accepted or sent, in bytes.
    ///
    /// A peer announcing a bigger frame is disconnected.
    pub max_frame_size: usize,

    /// Frames queued per link before senders wait.
    pub send_queue_capacity: usize,

    /// Timeout for establishing outbound links.
    pub connect_timeout: Duration,

    /// Serialization format.
    pub codec: CodecKind,

    /// Named peers seeded into the node's address table.
    pub peers: Vec<(String, Endpoint)>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_pending_requests: 1024,
            max_concurrent_handlers: 256,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_capacity: 256,
            connect_timeout: Duration::from_secs(5),
            codec: CodecKind::Json,
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration for same-host buses.
    pub fn local() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_millis(500),
            send_queue_capacity: 128,
            ..Self::default()
        }
    }

    /// Create a configuration for high-latency networks.
    pub fn wan() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            send_queue_capacity: 4096,
            max_pending_requests: 8192,
            max_concurrent_handlers: 1024,
            ..Self::default()
        }
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum number of pending requests.
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Set how many inbound requests are handled at once.
    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max.max(1);
        self
    }

    /// Set the maximum frame size in bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Set the per-link send queue capacity.
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Select the codec.
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Add a named peer to the address table seed.
    pub fn with_peer(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.peers.push((name.into(), endpoint));
        self
    }
}
