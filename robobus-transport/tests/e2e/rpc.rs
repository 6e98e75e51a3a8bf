//! Request/reply across links.

use std::time::{Duration, Instant};

use robobus_transport::{BusError, HandlerError, NodeConfig, RemoteErrorKind, Request, Value};
use serde_json::json;
use tokio::task::JoinSet;

use super::{init_tracing, tcp_pair, Pair};

/// Echo handler replying `{"n": n + 1}` after `delay_ms`, if given.
async fn increment(req: Request) -> Result<Value, HandlerError> {
    if let Some(ms) = req.body["delay_ms"].as_u64() {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    match req.body["n"].as_i64() {
        Some(n) => Ok(json!({ "n": n + 1 })),
        None => Err(HandlerError::new("missing n")),
    }
}

async fn increment_pair() -> Pair {
    let pair = tcp_pair(NodeConfig::local()).await;
    pair.server.set_request_handler(increment);
    pair
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_match_their_replies() {
    init_tracing();
    let pair = increment_pair().await;

    let mut calls = JoinSet::new();
    for n in 0..100i64 {
        let client = pair.client.clone();
        let peer = pair.to_server.clone();
        // Later calls finish first, so replies come back out of order.
        let delay = (100 - n) as u64 % 17;
        calls.spawn(async move {
            let reply = client
                .call(
                    &peer,
                    json!({ "n": n, "delay_ms": delay }),
                    Duration::from_secs(5),
                )
                .await;
            (n, reply)
        });
    }

    let mut answered = 0;
    while let Some(joined) = calls.join_next().await {
        let (n, reply) = joined.expect("call task");
        assert_eq!(reply.expect("reply"), json!({ "n": n + 1 }));
        answered += 1;
    }
    assert_eq!(answered, 100);
    assert_eq!(pair.client.pending_requests(), 0);
}

#[tokio::test]
async fn test_silent_peer_times_out_at_deadline() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;
    pair.server.set_request_handler(|_req: Request| async move {
        std::future::pending::<Result<Value, HandlerError>>().await
    });

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = pair
        .client
        .call(&pair.to_server, json!("anyone?"), timeout)
        .await
        .expect_err("no reply");
    let elapsed = started.elapsed();

    assert!(matches!(err, BusError::Timeout(d) if d == timeout));
    assert!(elapsed >= timeout, "failed early after {:?}", elapsed);
    assert!(
        elapsed < timeout + Duration::from_millis(500),
        "failed late after {:?}",
        elapsed
    );
    assert_eq!(pair.client.pending_requests(), 0);
}

#[tokio::test]
async fn test_late_reply_is_discarded_and_link_survives() {
    init_tracing();
    let pair = increment_pair().await;

    let err = pair
        .client
        .call(
            &pair.to_server,
            json!({ "n": 1, "delay_ms": 400 }),
            Duration::from_millis(100),
        )
        .await
        .expect_err("too slow");
    assert!(matches!(err, BusError::Timeout(_)));

    // Let the late reply arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pair.client.peers().len(), 1);

    let reply = pair
        .client
        .call(&pair.to_server, json!({ "n": 41 }), Duration::from_secs(2))
        .await
        .expect("link still usable");
    assert_eq!(reply, json!({ "n": 42 }));
}

#[tokio::test]
async fn test_peer_without_handler_refuses() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;

    let err = pair
        .client
        .request(&pair.to_server, json!({}))
        .await
        .expect_err("refused");
    match err {
        BusError::Remote(remote) => assert_eq!(remote.kind, RemoteErrorKind::NoHandler),
        other => panic!("expected a remote refusal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_refusal_carries_message() {
    init_tracing();
    let pair = increment_pair().await;

    let err = pair
        .client
        .request(&pair.to_server, json!({ "m": 1 }))
        .await
        .expect_err("refused");
    match err {
        BusError::Remote(remote) => {
            assert_eq!(remote.kind, RemoteErrorKind::HandlerFailed);
            assert_eq!(remote.message, "missing n");
        }
        other => panic!("expected a remote refusal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_accepting_side_can_call_back() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;
    pair.client.set_request_handler(increment);

    let reply = pair
        .server
        .request(&pair.to_client, json!({ "n": 9 }))
        .await
        .expect("reply over inbound link");
    assert_eq!(reply, json!({ "n": 10 }));
}

#[tokio::test]
async fn test_panicking_handler_is_reported() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local()).await;
    pair.server.set_request_handler(|req: Request| async move {
        if req.body.is_null() {
            panic!("boom");
        }
        Ok::<_, HandlerError>(req.body)
    });

    let err = pair
        .client
        .request(&pair.to_server, Value::Null)
        .await
        .expect_err("handler panicked");
    assert!(matches!(
        err,
        BusError::Remote(ref remote) if remote.kind == RemoteErrorKind::HandlerFailed
    ));

    let reply = pair
        .client
        .request(&pair.to_server, json!("still here"))
        .await
        .expect("server keeps serving");
    assert_eq!(reply, json!("still here"));
}

#[tokio::test]
async fn test_requests_beyond_handler_limit_are_refused() {
    init_tracing();
    let pair = tcp_pair(NodeConfig::local().with_max_concurrent_handlers(2)).await;
    pair.server.set_request_handler(|_req: Request| async move {
        std::future::pending::<Result<Value, HandlerError>>().await
    });

    let mut calls = JoinSet::new();
    for i in 0..3 {
        let client = pair.client.clone();
        let peer = pair.to_server.clone();
        calls.spawn(async move {
            client
                .call(&peer, json!({ "i": i }), Duration::from_millis(500))
                .await
        });
    }

    let (mut overloaded, mut timed_out) = (0, 0);
    while let Some(joined) = calls.join_next().await {
        match joined.expect("call task") {
            Err(BusError::Remote(remote)) if remote.kind == RemoteErrorKind::Overloaded => {
                overloaded += 1
            }
            Err(BusError::Timeout(_)) => timed_out += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!((overloaded, timed_out), (1, 2));
    assert_eq!(pair.server.peers().len(), 1);
}
