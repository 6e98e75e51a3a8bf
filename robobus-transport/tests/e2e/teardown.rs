//! Link teardown, malformed input and unsubscribe races.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use robobus_transport::{BusError, Endpoint, HandlerError, Node, NodeConfig, Request, Value};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use super::{init_tracing, tcp_pair, wait_for_interest, wait_until, Pair};

async fn never_replying_pair() -> Pair {
    let pair = tcp_pair(NodeConfig::local()).await;
    pair.server.set_request_handler(|_req: Request| async move {
        std::future::pending::<Result<Value, HandlerError>>().await
    });
    pair
}

fn spawn_calls(pair: &Pair, count: usize) -> JoinSet<Result<Value, BusError>> {
    let mut calls = JoinSet::new();
    for i in 0..count {
        let client = pair.client.clone();
        let peer = pair.to_server.clone();
        calls.spawn(async move {
            client
                .call(&peer, json!({ "i": i }), Duration::from_secs(30))
                .await
        });
    }
    calls
}

async fn assert_all_link_closed(mut calls: JoinSet<Result<Value, BusError>>) {
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        let mut failed = 0;
        while let Some(joined) = calls.join_next().await {
            let result = joined.expect("call task");
            assert!(
                matches!(result, Err(BusError::LinkClosed)),
                "expected LinkClosed, got {:?}",
                result
            );
            failed += 1;
        }
        failed
    })
    .await
    .expect("calls resolved well before their deadline");
    assert_eq!(outcome, 3);
}

#[tokio::test]
async fn test_local_disconnect_fails_outstanding_calls() {
    init_tracing();
    let pair = never_replying_pair().await;
    let calls = spawn_calls(&pair, 3);
    wait_until("three pending calls", || pair.client.pending_requests() == 3).await;

    assert!(pair.client.disconnect(&pair.to_server));
    assert!(!pair.client.disconnect(&pair.to_server));

    assert_all_link_closed(calls).await;
    assert_eq!(pair.client.pending_requests(), 0);
    assert!(pair.client.peers().is_empty());

    // The handle now points at nothing.
    assert!(matches!(
        pair.client.request(&pair.to_server, json!(1)).await,
        Err(BusError::LinkClosed)
    ));
}

#[tokio::test]
async fn test_remote_close_fails_outstanding_calls() {
    init_tracing();
    let pair = never_replying_pair().await;
    let calls = spawn_calls(&pair, 3);
    wait_until("three pending calls", || pair.client.pending_requests() == 3).await;

    pair.server.close();

    assert_all_link_closed(calls).await;
    wait_until("client to drop the link", || pair.client.peers().is_empty()).await;
}

async fn raw_client() -> (Node, TcpStream) {
    let server = Node::new("server", NodeConfig::local());
    let bound = server
        .bind(&Endpoint::tcp("127.0.0.1", 0))
        .await
        .expect("bind");
    let stream = TcpStream::connect(bound.location()).await.expect("connect");
    wait_until("server to accept", || server.peers().len() == 1).await;
    (server, stream)
}

/// Read until the server hangs up. A reset counts as hanging up.
async fn assert_hung_up(stream: &mut TcpStream) {
    let mut sink = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut sink)).await;
    assert!(read.is_ok(), "server kept the link open");
}

#[tokio::test]
async fn test_undecodable_payload_closes_link() {
    init_tracing();
    let (server, mut stream) = raw_client().await;

    let payload = b"definitely not json";
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.expect("write");

    assert_hung_up(&mut stream).await;
    wait_until("server to drop the link", || server.peers().is_empty()).await;
    assert!(!server.is_closed());
}

#[tokio::test]
async fn test_oversized_frame_header_closes_link() {
    init_tracing();
    let (server, mut stream) = raw_client().await;

    stream
        .write_all(&u32::MAX.to_be_bytes())
        .await
        .expect("write");

    assert_hung_up(&mut stream).await;
    wait_until("server to drop the link", || server.peers().is_empty()).await;
}

#[tokio::test]
async fn test_unknown_kind_closes_link() {
    init_tracing();
    let (server, mut stream) = raw_client().await;

    let payload = serde_json::to_vec(&json!({"kind": "gossip", "from": "x", "body": 1}))
        .expect("encode");
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&payload);
    stream.write_all(&frame).await.expect("write");

    assert_hung_up(&mut stream).await;
    wait_until("server to drop the link", || server.peers().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_delivery_after_unsubscribe_under_traffic() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    // Keeps the client sending regardless of the churn below.
    let (_anchor, mut anchor_rx) = pair
        .server
        .subscribe_queue("load/#")
        .await
        .expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "load/#").await;

    let stop = Arc::new(AtomicBool::new(false));
    let publisher = {
        let client = pair.client.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut seq = 0u64;
            while !stop.load(Ordering::Relaxed) {
                seq += 1;
                if client.publish("load/tick", json!(seq)).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
    };
    let drain = tokio::spawn(async move { while anchor_rx.recv().await.is_some() {} });

    let late_deliveries = Arc::new(AtomicUsize::new(0));
    let mut total_delivered = 0;
    for _ in 0..25 {
        let gone = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicUsize::new(0));
        let handle = {
            let gone = gone.clone();
            let delivered = delivered.clone();
            let late = late_deliveries.clone();
            pair.server
                .subscribe("load/tick", move |_| {
                    if gone.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                    delivered.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .expect("subscribe")
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pair.server.unsubscribe(handle).await);
        gone.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        total_delivered += delivered.load(Ordering::SeqCst);
    }

    stop.store(true, Ordering::Relaxed);
    publisher.await.expect("publisher");
    pair.server.close();
    drain.await.expect("drain");

    assert_eq!(late_deliveries.load(Ordering::SeqCst), 0);
    assert!(total_delivered > 0, "churned subscriptions saw no traffic");
}
