//! The same bus over Unix domain sockets.
#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use robobus_transport::{Endpoint, HandlerError, Node, NodeConfig, Protocol, Request};
use serde_json::json;

use super::{init_tracing, server_side, wait_for_interest, wait_until};

fn socket_endpoint(dir: &tempfile::TempDir, name: &str) -> Endpoint {
    let path = dir.path().join(name);
    Endpoint::ipc(path.to_string_lossy().into_owned())
}

#[tokio::test]
async fn test_request_and_publish_over_ipc() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let endpoint = socket_endpoint(&dir, "arm.sock");

    let arm = Node::new("arm", NodeConfig::local());
    let bound = arm.bind(&endpoint).await.expect("bind");
    assert_eq!(bound.protocol(), Protocol::Ipc);
    assert!(Path::new(bound.location()).exists());

    arm.set_request_handler(|req: Request| async move {
        Ok::<_, HandlerError>(json!({ "joint": req.body["joint"], "ok": true }))
    });
    let (_handle, mut rx) = arm.subscribe_queue("arm/cmd").await.expect("subscribe");

    let planner = Node::new("planner", NodeConfig::local());
    let to_arm = planner.connect(&bound).await.expect("connect");

    let reply = planner
        .call(&to_arm, json!({ "joint": "wrist" }), Duration::from_secs(2))
        .await
        .expect("reply");
    assert_eq!(reply, json!({ "joint": "wrist", "ok": true }));

    wait_for_interest(&planner, &to_arm, "arm/cmd").await;
    planner
        .publish("arm/cmd", json!("home"))
        .await
        .expect("publish");
    let publication = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("in time")
        .expect("delivered");
    assert_eq!(publication.body, json!("home"));
    assert_eq!(&publication.from, planner.id());
}

#[tokio::test]
async fn test_two_clients_share_one_socket_path() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let endpoint = socket_endpoint(&dir, "hub.sock");

    let hub = Node::new("hub", NodeConfig::local());
    let bound = hub.bind(&endpoint).await.expect("bind");
    hub.set_request_handler(|req: Request| async move {
        Ok::<_, HandlerError>(json!(req.from.as_str()))
    });

    let first = Node::new("first", NodeConfig::local());
    let second = Node::new("second", NodeConfig::local());
    let first_link = first.connect(&bound).await.expect("connect");
    let second_link = second.connect(&bound).await.expect("connect");

    server_side(&hub, &first).await;
    server_side(&hub, &second).await;
    assert_eq!(hub.peers().len(), 2);

    let a = first.request(&first_link, json!(null)).await.expect("reply");
    let b = second.request(&second_link, json!(null)).await.expect("reply");
    assert_eq!(a, json!(first.id().as_str()));
    assert_eq!(b, json!(second.id().as_str()));
}

#[tokio::test]
async fn test_close_removes_socket_file() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let endpoint = socket_endpoint(&dir, "gone.sock");

    let node = Node::new("temp", NodeConfig::local());
    let bound = node.bind(&endpoint).await.expect("bind");
    let path = bound.location().to_string();
    assert!(Path::new(&path).exists());

    node.close();
    wait_until("socket file removal", || !Path::new(&path).exists()).await;

    // The path is free again.
    let again = Node::new("again", NodeConfig::local());
    again.bind(&endpoint).await.expect("rebind");
}
