use std::sync::Arc;
use std::time::{Duration, Instant};

use ciborium::Value;
use tokio_test::assert_ok;

use super::{at, ClientConfig, Connection, ConnectionBuilder, NoVars};
use crate::mock::{MockServer, Reply};
use crate::protocol::{ClientError, NsUserAuth, Response};

fn quick_config(timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_millis(timeout_ms),
        ..ClientConfig::default()
    }
}

/// Answers `echo` with its first param after `delay_ms` (second param, if any).
async fn echo_server() -> MockServer {
    MockServer::start(|req| {
        let params = match &req.params {
            Value::Array(params) => params.clone(),
            _ => Vec::new(),
        };
        match req.method.as_str() {
            "echo" => {
                let value = params.first().cloned().unwrap_or(Value::Null);
                let delay = params
                    .get(1)
                    .and_then(|d| d.as_integer())
                    .and_then(|d| u64::try_from(d).ok())
                    .unwrap_or(0);
                vec![Reply::Delayed(
                    Duration::from_millis(delay),
                    Response::ok(req.id, value),
                )]
            }
            "silent" => vec![Reply::Silent],
            "late" => vec![Reply::Delayed(
                Duration::from_millis(300),
                Response::ok(req.id, Value::Text("too late".into())),
            )],
            "garbage" => vec![
                Reply::Raw(vec![0xff, 0xfe, 0x00]),
                Reply::Respond(Response::ok(req.id, Value::Bool(true))),
            ],
            "stale" => vec![
                Reply::Respond(Response::ok(req.id + 1000, Value::Null)),
                Reply::Respond(Response::ok(req.id, Value::Text("fresh".into()))),
            ],
            "fail" => vec![Reply::Respond(Response::error(
                req.id,
                -32000,
                "There was a problem with the database",
            ))],
            "hangup" => vec![Reply::Hangup],
            "stall" => vec![Reply::Stall],
            _ => vec![Reply::Respond(Response::ok(req.id, Value::Null))],
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_end_to_end_session() {
    let server = MockServer::database().await.unwrap();
    let conn = Connection::new();

    assert_ok!(conn.connect(&server.host()).await);
    assert_ok!(conn.use_namespace("test").await);
    assert_ok!(conn.signin("root", "root").await);

    let results = conn.query("RETURN 1+1", NoVars {}).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    assert_eq!(at::<i64>(&results, 0).unwrap(), 2);

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].method, "use");
    assert_eq!(
        requests[0].params,
        Value::Array(vec![Value::Text("test".into()), Value::Null])
    );
    assert_eq!(requests[1].method, "signin");
    let auth: Vec<NsUserAuth> = requests[1].params.deserialized().unwrap();
    assert_eq!(auth[0].ns, "test");
    assert_eq!(auth[0].user, "root");
    assert_eq!(auth[0].pass, "root");
    assert_eq!(requests[2].method, "query");
    assert_eq!(
        requests[2].params,
        Value::Array(vec![Value::Text("RETURN 1+1".into()), Value::Map(vec![])])
    );

    let ids: Vec<u32> = requests.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_ok!(conn.close().await);
}

#[tokio::test]
async fn test_query_error_surfaces_message() {
    let server = MockServer::database().await.unwrap();
    let conn = Connection::new();
    conn.connect(&server.host()).await.unwrap();

    let results = conn
        .query("RETURN 1+1; THROW \"no such table\"", NoVars {})
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(at::<i64>(&results, 0).unwrap(), 2);
    match at::<i64>(&results, 1) {
        Err(ClientError::Query(msg)) => assert_eq!(msg, "no such table"),
        other => panic!("expected query error, got {:?}", other),
    }

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_use_database_records_scope() {
    let server = MockServer::database().await.unwrap();
    let conn = Connection::new();
    conn.connect(&server.host()).await.unwrap();

    assert!(matches!(
        conn.use_database("logs").await,
        Err(ClientError::NoNamespace)
    ));
    assert!(matches!(
        conn.signin("root", "root").await,
        Err(ClientError::NoNamespace)
    ));
    assert!(matches!(
        conn.use_namespace("").await,
        Err(ClientError::NoNamespace)
    ));
    // nothing reached the wire
    assert!(server.requests().is_empty());

    conn.use_namespace("test").await.unwrap();
    conn.use_database("logs").await.unwrap();
    assert_eq!(conn.namespace().await.as_deref(), Some("test"));
    assert_eq!(conn.database().await.as_deref(), Some("logs"));

    let requests = server.requests();
    assert_eq!(
        requests[1].params,
        Value::Array(vec![Value::Text("test".into()), Value::Text("logs".into())])
    );

    conn.close().await.unwrap();
    assert_eq!(conn.namespace().await, None);
    assert_eq!(conn.database().await, None);
}

#[tokio::test]
async fn test_connect_same_host_is_noop() {
    let server = echo_server().await;
    let conn = Connection::new();

    conn.connect(&server.host()).await.unwrap();
    conn.connect(&server.host()).await.unwrap();

    assert_eq!(server.connection_count(), 1);
    assert_eq!(conn.host().await, Some(server.host()));
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_other_host_conflicts() {
    let first = echo_server().await;
    let second = echo_server().await;
    let conn = Connection::new();

    conn.connect(&first.host()).await.unwrap();
    match conn.connect(&second.host()).await {
        Err(ClientError::Conflict { current, requested }) => {
            assert_eq!(current, first.host());
            assert_eq!(requested, second.host());
        }
        other => panic!("expected Conflict, got {:?}", other),
    }
    // still bound to the first host
    assert_eq!(conn.host().await, Some(first.host()));
    assert_ok!(conn.call("ping", ()).await);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_close_twice_then_reconnect() {
    let first = echo_server().await;
    let second = echo_server().await;
    let conn = Connection::new();

    conn.connect(&first.host()).await.unwrap();
    conn.call("ping", ()).await.unwrap();
    conn.call("ping", ()).await.unwrap();

    assert_ok!(conn.close().await);
    assert_ok!(conn.close().await);
    assert!(!conn.is_connected().await);

    // same host again, numbering restarts
    conn.connect(&first.host()).await.unwrap();
    conn.call("ping", ()).await.unwrap();
    let ids: Vec<u32> = first.requests().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 1]);
    conn.close().await.unwrap();

    // a different host is fine once closed
    conn.connect(&second.host()).await.unwrap();
    conn.call("ping", ()).await.unwrap();
    assert_eq!(second.requests()[0].id, 1);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_call_when_disconnected_is_closed() {
    let conn = Connection::new();

    assert!(matches!(conn.call("ping", ()).await, Err(ClientError::Closed)));
    assert!(matches!(
        conn.query("RETURN 1", NoVars {}).await,
        Err(ClientError::Closed)
    ));
    assert_ok!(conn.close().await);
}

#[tokio::test]
async fn test_dial_failure_stays_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let conn = Connection::new();
    assert!(matches!(
        conn.connect(&addr.to_string()).await,
        Err(ClientError::Dial(_))
    ));
    assert!(!conn.is_connected().await);
}

#[tokio::test]
async fn test_timeout_removes_waiter_and_ignores_late_reply() {
    let server = echo_server().await;
    let conn = Connection::with_config(quick_config(100));
    conn.connect(&server.host()).await.unwrap();

    let started = Instant::now();
    match conn.call("late", ()).await {
        Err(ClientError::Timeout { method, after }) => {
            assert_eq!(method, "late");
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(conn.pending_len().await, 0);

    // let the late reply land; the dispatcher must drop it and keep going
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(conn.pending_len().await, 0);

    let value = conn
        .call("echo", (Value::Text("still alive".into()),))
        .await
        .unwrap();
    assert_eq!(value, Value::Text("still alive".into()));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_each_call_gets_its_own_window() {
    let server = echo_server().await;
    let conn = Connection::with_config(quick_config(250));
    conn.connect(&server.host()).await.unwrap();

    // 150 ms each: together over the window, each one inside it
    for _ in 0..3 {
        let value = conn.call("echo", (1, 150)).await.unwrap();
        assert_eq!(value, Value::Integer(1.into()));
    }

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_maps_code_and_message() {
    let server = echo_server().await;
    let conn = Connection::new();
    conn.connect(&server.host()).await.unwrap();

    match conn.call("fail", ()).await {
        Err(ClientError::Server {
            method,
            id,
            code,
            message,
        }) => {
            assert_eq!(method, "fail");
            assert_eq!(id, 1);
            assert_eq!(code, -32000);
            assert_eq!(message, "There was a problem with the database");
        }
        other => panic!("expected Server error, got {:?}", other),
    }
    assert_eq!(conn.pending_len().await, 0);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_dispatch() {
    let server = echo_server().await;
    let conn = Connection::with_config(quick_config(1000));
    conn.connect(&server.host()).await.unwrap();

    assert_eq!(conn.call("garbage", ()).await.unwrap(), Value::Bool(true));
    assert_eq!(conn.call("stale", ()).await.unwrap(), Value::Text("fresh".into()));
    assert!(conn.closing_error().await.is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let server = echo_server().await;
    let conn = Arc::new(Connection::new());
    conn.connect(&server.host()).await.unwrap();

    // later requests are answered first
    let calls: Vec<_> = (0..10i64)
        .map(|n| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { (n, conn.call("echo", (n, (10 - n) * 20)).await) })
        })
        .collect();

    for call in calls {
        let (n, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), Value::Integer(n.into()));
    }
    assert_eq!(conn.pending_len().await, 0);

    let mut ids: Vec<u32> = server.requests().iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=10).collect::<Vec<u32>>());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_in_flight_calls() {
    let server = echo_server().await;
    let conn = Arc::new(Connection::new());
    conn.connect(&server.host()).await.unwrap();

    let waiting = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.call("silent", ()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    assert_ok!(conn.close().await);
    let result = waiting.await.unwrap();

    assert!(matches!(result, Err(ClientError::Closed)));
    // released by the close, not by the 5 second timeout
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(conn.call("ping", ()).await, Err(ClientError::Closed)));
}

/// Larger than the loopback socket buffers, so writing it blocks once the
/// peer stops reading.
fn oversized_payload() -> String {
    "x".repeat(15 << 20)
}

async fn wait_for_requests(server: &MockServer, count: usize) {
    let started = Instant::now();
    while server.requests().len() < count {
        assert!(started.elapsed() < Duration::from_secs(5), "server never saw the request");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_close_releases_a_call_stuck_writing() {
    let server = echo_server().await;
    let conn = Arc::new(Connection::with_config(quick_config(30_000)));
    conn.connect(&server.host()).await.unwrap();

    let stalled = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.call("stall", ()).await })
    };
    wait_for_requests(&server, 1).await;

    let writing = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.call("echo", (oversized_payload(),)).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!writing.is_finished());

    let started = Instant::now();
    let closed = tokio::time::timeout(Duration::from_secs(5), conn.close()).await;
    assert!(closed.is_ok(), "close() waited on the blocked writer");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!conn.is_connected().await);

    let result = tokio::time::timeout(Duration::from_secs(2), writing)
        .await
        .expect("writing call should be released by close")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Closed)), "{:?}", result);

    let result = stalled.await.unwrap();
    assert!(matches!(result, Err(ClientError::Closed)), "{:?}", result);
}

#[tokio::test]
async fn test_timeout_covers_a_blocked_write() {
    let server = echo_server().await;
    let conn = Connection::with_config(quick_config(300));
    conn.connect(&server.host()).await.unwrap();

    let result = conn.call("stall", ()).await;
    assert!(matches!(result, Err(ClientError::Timeout { .. })));
    wait_for_requests(&server, 1).await;

    let started = Instant::now();
    let result = conn.call("echo", (oversized_payload(),)).await;
    match result {
        Err(ClientError::Timeout { method, after }) => {
            assert_eq!(method, "echo");
            assert_eq!(after, Duration::from_millis(300));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    let closed = tokio::time::timeout(Duration::from_secs(5), conn.close()).await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_call_racing_close_reports_closed() {
    let server = echo_server().await;
    let conn = Arc::new(Connection::new());

    for _ in 0..20 {
        conn.connect(&server.host()).await.unwrap();

        let call = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.call("silent", ()).await })
        };
        tokio::task::yield_now().await;
        let _ = conn.close().await;

        let result = call.await.unwrap();
        assert!(matches!(result, Err(ClientError::Closed)), "{:?}", result);
    }
}

#[tokio::test]
async fn test_peer_hangup_is_recorded() {
    let server = echo_server().await;
    let conn = Connection::with_config(quick_config(300));
    conn.connect(&server.host()).await.unwrap();

    let result = conn.call("hangup", ()).await;
    assert!(matches!(result, Err(ClientError::Timeout { .. })));

    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .expect("closed() should resolve after the peer goes away");
    assert!(matches!(
        conn.closing_error().await,
        Some(ClientError::Read(_))
    ));

    // the socket is gone, but teardown still completes and the object is reusable
    let _ = conn.close().await;
    assert!(!conn.is_connected().await);
    conn.connect(&server.host()).await.unwrap();
    assert_ok!(conn.call("ping", ()).await);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_after_close_resolves() {
    let server = echo_server().await;
    let conn = Arc::new(Connection::new());
    conn.connect(&server.host()).await.unwrap();

    let watcher = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.closed().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!watcher.is_finished());

    conn.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), watcher)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_builder_runs_session_steps() {
    let server = MockServer::database().await.unwrap();

    let conn = ConnectionBuilder::new(&server.host())
        .timeout_ms(2000)
        .namespace("test")
        .auth("root", "root")
        .database("logs")
        .connect()
        .await
        .unwrap();

    assert_eq!(conn.config().timeout, Duration::from_millis(2000));
    assert_eq!(conn.namespace().await.as_deref(), Some("test"));
    assert_eq!(conn.database().await.as_deref(), Some("logs"));
    let methods: Vec<String> = server.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec!["use", "signin", "use"]);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_builder_closes_on_failed_step() {
    let server = MockServer::start(|req| match req.method.as_str() {
        "signin" => vec![Reply::Respond(Response::error(
            req.id,
            -32000,
            "There was a problem with authentication",
        ))],
        _ => vec![Reply::Respond(Response::ok(req.id, Value::Null))],
    })
    .await
    .unwrap();

    let result = ConnectionBuilder::new(&server.host())
        .namespace("test")
        .auth("root", "wrong")
        .connect()
        .await;

    match result {
        Err(ClientError::Server { message, .. }) => {
            assert_eq!(message, "There was a problem with authentication")
        }
        Err(other) => panic!("expected Server error, got {:?}", other),
        Ok(_) => panic!("signin with a wrong password should fail"),
    }
}
