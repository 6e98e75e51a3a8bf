//! Publish/subscribe across links.

use std::time::Duration;

use robobus_transport::{Endpoint, Node, NodeConfig, Publication};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{init_tracing, server_side, tcp_pair, wait_for_interest, wait_until};

async fn next(rx: &mut UnboundedReceiver<Publication>) -> Publication {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("publication in time")
        .expect("subscription open")
}

async fn assert_quiet(rx: &mut UnboundedReceiver<Publication>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected extra delivery");
}

#[tokio::test]
async fn test_each_matching_subscription_receives_once() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let (first, mut first_rx) = pair
        .server
        .subscribe_queue("sensors/#")
        .await
        .expect("subscribe");
    let (_second, mut second_rx) = pair
        .server
        .subscribe_queue("sensors/#")
        .await
        .expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "sensors/#").await;

    pair.client
        .publish("sensors/lidar", json!({"range": 4.2}))
        .await
        .expect("publish");

    for rx in [&mut first_rx, &mut second_rx] {
        let publication = next(rx).await;
        assert_eq!(publication.topic, "sensors/lidar");
        assert_eq!(&publication.from, pair.client.id());
        assert_eq!(publication.body, json!({"range": 4.2}));
        assert_quiet(rx).await;
    }

    assert!(pair.server.unsubscribe(first).await);
    pair.client
        .publish("sensors/lidar", json!({"range": 1.0}))
        .await
        .expect("publish");

    assert_eq!(next(&mut second_rx).await.body, json!({"range": 1.0}));
    // The registry dropped the sender side with the subscription.
    assert!(first_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_fanout_to_every_interested_node() {
    init_tracing();
    let hub = Node::new("hub", NodeConfig::local());
    let bound = hub
        .bind(&Endpoint::tcp("127.0.0.1", 0))
        .await
        .expect("bind");

    let mut receivers = Vec::new();
    let mut nodes = Vec::new();
    for name in ["left", "right"] {
        let node = Node::new(name, NodeConfig::local());
        node.connect(&bound).await.expect("connect");
        let (_handle, rx) = node.subscribe_queue("drive/*").await.expect("subscribe");
        let link = server_side(&hub, &node).await;
        wait_for_interest(&hub, &link, "drive/*").await;
        receivers.push(rx);
        nodes.push(node);
    }

    hub.publish("drive/speed", json!(0.75)).await.expect("publish");

    for rx in &mut receivers {
        let publication = next(rx).await;
        assert_eq!(publication.topic, "drive/speed");
        assert_eq!(&publication.from, hub.id());
    }
}

#[tokio::test]
async fn test_uninterested_peer_gets_nothing() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let (_handle, mut rx) = pair
        .server
        .subscribe_queue("arm/joint")
        .await
        .expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "arm/joint").await;

    pair.client
        .publish("arm/gripper", json!("open"))
        .await
        .expect("publish");
    pair.client
        .publish("arm/joint", json!(1))
        .await
        .expect("publish");

    // Frames on one link arrive in order, so "arm/gripper" would have come first.
    assert_eq!(next(&mut rx).await.topic, "arm/joint");
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_catch_all_never_sees_control_traffic() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let (_all, mut rx) = pair.server.subscribe_queue("#").await.expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "#").await;

    // Client subscriptions trigger interest announcements towards the server.
    let (extra, _extra_rx) = pair.client.subscribe_queue("odom").await.expect("subscribe");
    wait_for_interest(&pair.server, &pair.to_client, "odom").await;
    assert!(pair.client.unsubscribe(extra).await);

    pair.client
        .publish("status", json!("ok"))
        .await
        .expect("publish");

    assert_eq!(next(&mut rx).await.topic, "status");
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_unsubscribing_everything_announces_empty_interest() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let (handle, _rx) = pair
        .server
        .subscribe_queue("map/tiles")
        .await
        .expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "map/tiles").await;

    assert!(pair.server.unsubscribe(handle).await);
    wait_until("empty interest", || {
        pair.client
            .peer_interest(&pair.to_server)
            .is_some_and(|patterns| patterns.is_empty())
    })
    .await;
}

#[tokio::test]
async fn test_periodic_publisher_reaches_remote_subscriber() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let (_handle, mut rx) = pair
        .server
        .subscribe_queue("heartbeat")
        .await
        .expect("subscribe");
    wait_for_interest(&pair.client, &pair.to_server, "heartbeat").await;

    let mut beat = 0u64;
    let periodic = pair
        .client
        .publish_every("heartbeat", Duration::from_millis(20), move || {
            beat += 1;
            json!(beat)
        })
        .expect("publish_every");

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(next(&mut rx).await.body);
    }
    periodic.cancel();
    assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
}
