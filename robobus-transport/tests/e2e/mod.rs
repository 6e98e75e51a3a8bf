//! Shared setup for the end-to-end tests.

pub mod ipc;
pub mod pubsub;
pub mod rpc;
pub mod teardown;

use std::time::Duration;

use robobus_transport::{Endpoint, Node, NodeConfig, PeerHandle};

/// How long `wait_until` polls before giving up.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Poll `condition` until it holds, panicking with `what` after
/// [`SETTLE_TIMEOUT`].
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let started = tokio::time::Instant::now();
    while !condition() {
        if started.elapsed() > SETTLE_TIMEOUT {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A server bound on loopback and a client linked to it.
pub struct Pair {
    /// Accepting side.
    pub server: Node,
    /// Connecting side.
    pub client: Node,
    /// Client's handle for the link to the server.
    pub to_server: PeerHandle,
    /// Server's handle for the same link.
    pub to_client: PeerHandle,
}

/// Bind `server` on an ephemeral loopback port and connect a fresh client.
pub async fn tcp_pair(config: NodeConfig) -> Pair {
    let server = Node::new("server", config.clone());
    let bound = server
        .bind(&Endpoint::tcp("127.0.0.1", 0))
        .await
        .expect("bind");
    let client = Node::new("client", config);
    let to_server = client.connect(&bound).await.expect("connect");
    let to_client = server_side(&server, &client).await;
    Pair {
        server,
        client,
        to_server,
        to_client,
    }
}

/// Wait until `server` has identified the link from `client`.
pub async fn server_side(server: &Node, client: &Node) -> PeerHandle {
    wait_until("server to learn the client", || {
        server.peer(client.id()).is_ok()
    })
    .await;
    server.peer(client.id()).expect("peer known")
}

/// Wait until the peer behind `link` has announced interest in `pattern`.
pub async fn wait_for_interest(node: &Node, link: &PeerHandle, pattern: &str) {
    wait_until(&format!("interest in {}", pattern), || {
        node.peer_interest(link)
            .is_some_and(|patterns| patterns.iter().any(|p| p.to_string() == pattern))
    })
    .await;
}
