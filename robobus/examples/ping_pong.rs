//! Ping-Pong Example: two robobus nodes over real TCP.
//!
//! Run as two separate processes:
//!
//! ```bash
//! # Terminal 1 - Start the server
//! cargo run --example ping_pong -- server
//!
//! # Terminal 2 - Run the client
//! cargo run --example ping_pong -- client
//! ```
//!
//! With no argument both sides run in one process.
//!
//! The server answers `ping` requests and publishes a heartbeat; the client
//! subscribes to the heartbeat, sends a few pings and prints the replies.

use std::env;
use std::time::Duration;

use robobus::{BusError, Endpoint, HandlerError, Node, NodeConfig, Request};
use serde_json::json;

const SERVER_ENDPOINT: &str = "tcp://127.0.0.1:4500";
const PINGS: u64 = 5;

async fn run_server(endpoint: &Endpoint) -> Result<Node, BusError> {
    let server = Node::new("pong", NodeConfig::local());
    let bound = server.bind(endpoint).await?;

    server.set_request_handler(|req: Request| async move {
        let seq = req.body["seq"]
            .as_u64()
            .ok_or_else(|| HandlerError::new("ping without seq"))?;
        tracing::info!("ping {} from {}", seq, req.from);
        Ok::<_, HandlerError>(json!({
            "seq": seq,
            "echo": format!("pong:{}", req.body["message"]),
        }))
    });

    let mut beats = 0u64;
    // The handle is not needed: the heartbeat stops when the node closes.
    let _heartbeat = server.publish_every("pong/heartbeat", Duration::from_millis(250), move || {
        beats += 1;
        json!({ "beat": beats })
    })?;

    tracing::info!("server {} listening on {}", server.id(), bound);
    Ok(server)
}

async fn run_client(endpoint: &Endpoint) -> Result<(), BusError> {
    let client = Node::new("ping", NodeConfig::local());
    let peer = client.connect(endpoint).await?;

    let heartbeat = client
        .subscribe("pong/heartbeat", |publication| {
            tracing::info!("heartbeat {} from {}", publication.body, publication.from);
        })
        .await?;

    for seq in 1..=PINGS {
        let reply = client
            .call(
                &peer,
                json!({ "seq": seq, "message": "hello" }),
                Duration::from_secs(2),
            )
            .await?;
        tracing::info!("reply: {}", reply);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    client.unsubscribe(heartbeat).await;
    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let endpoint = Endpoint::parse(SERVER_ENDPOINT)?;
    match env::args().nth(1).as_deref() {
        Some("server") => {
            let server = run_server(&endpoint).await?;
            tokio::signal::ctrl_c().await?;
            server.close();
        }
        Some("client") => run_client(&endpoint).await?,
        Some(other) => {
            eprintln!("usage: ping_pong [server|client], got {:?}", other);
            std::process::exit(2);
        }
        None => {
            let server = run_server(&endpoint).await?;
            run_client(&endpoint).await?;
            server.close();
        }
    }
    Ok(())
}
