// tests/integration/redis_backend_test.rs

//! Tests for `RedisBackend` against a scripted RESP server on localhost.

use super::test_helpers::{fast_config, init_tracing, mock_transport, peer_addr};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pubsub_bridge::connection::{ConnectionHandler, ShutdownCause};
use pubsub_bridge::core::protocol::{RespFrame, RespFrameCodec};
use pubsub_bridge::core::pubsub::{PubSubBackend, RedisBackend, SubscriptionContext};
use pubsub_bridge::core::{BridgeError, Delivery};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;

type ServerConn = Framed<tokio::net::TcpStream, RespFrameCodec>;

fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

async fn fake_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

async fn accept(listener: &TcpListener) -> ServerConn {
    let (socket, _) = listener.accept().await.unwrap();
    Framed::new(socket, RespFrameCodec)
}

async fn expect_command(conn: &mut ServerConn, parts: &[&str]) {
    let frame = conn.next().await.unwrap().unwrap();
    assert_eq!(frame, RespFrame::command(parts.iter().copied()));
}

#[tokio::test]
async fn test_publish_replies_and_errors() {
    let (listener, addr) = fake_server().await;
    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        expect_command(&mut conn, &["PUBLISH", "news", "hello world"]).await;
        conn.send(RespFrame::Integer(2)).await.unwrap();
        expect_command(&mut conn, &["PUBLISH", "news", "again"]).await;
        conn.send(RespFrame::Error("ERR readonly".into())).await.unwrap();
        // The connection survives a refused command.
        expect_command(&mut conn, &["PUBLISH", "news", "third"]).await;
        conn.send(RespFrame::Integer(0)).await.unwrap();
    });

    let backend = RedisBackend::new(addr, None);
    backend.publish("news", "hello world").await.unwrap();
    assert_eq!(
        backend.publish("news", "again").await,
        Err(BridgeError::Exec("ERR readonly".into()))
    );
    backend.publish("news", "third").await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_publish_reconnects_after_lost_connection() {
    let (listener, addr) = fake_server().await;
    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        expect_command(&mut conn, &["PUBLISH", "a", "1"]).await;
        drop(conn);

        let mut conn = accept(&listener).await;
        expect_command(&mut conn, &["PUBLISH", "a", "2"]).await;
        conn.send(RespFrame::Integer(1)).await.unwrap();
    });

    let backend = RedisBackend::new(addr, None);
    assert!(matches!(
        backend.publish("a", "1").await,
        Err(BridgeError::Exec(_))
    ));
    backend.publish("a", "2").await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_subscription_context_forwards_messages() {
    let (listener, addr) = fake_server().await;
    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        expect_command(&mut conn, &["AUTH", "s3cret"]).await;
        conn.send(RespFrame::SimpleString("OK".into())).await.unwrap();
        expect_command(&mut conn, &["PING"]).await;
        conn.send(RespFrame::SimpleString("PONG".into())).await.unwrap();

        expect_command(&mut conn, &["SUBSCRIBE", "x", "y"]).await;
        for channel in ["x", "y"] {
            conn.send(RespFrame::Array(vec![
                bulk("subscribe"),
                bulk(channel),
                RespFrame::Integer(1),
            ]))
            .await
            .unwrap();
        }
        conn.send(RespFrame::Array(vec![bulk("message"), bulk("x"), bulk("hi")]))
            .await
            .unwrap();

        expect_command(&mut conn, &["PSUBSCRIBE", "n*"]).await;
        conn.send(RespFrame::Array(vec![
            bulk("pmessage"),
            bulk("n*"),
            bulk("news"),
            bulk("hey"),
        ]))
        .await
        .unwrap();
        // Closing the socket ends the delivery stream.
    });

    let backend = RedisBackend::new(addr, Some("s3cret".into()));
    let mut ctx = backend.new_subscription_context().await.unwrap();
    ctx.ping().await.unwrap();
    let mut deliveries = ctx.deliveries().unwrap();
    assert!(ctx.deliveries().is_none());

    ctx.subscribe(&["x".to_string(), "y".to_string()])
        .await
        .unwrap();
    assert_eq!(deliveries.next().await, Some(Delivery::message("x", "hi")));

    ctx.psubscribe(&["n*".to_string()]).await.unwrap();
    assert_eq!(
        deliveries.next().await,
        Some(Delivery::pmessage("n*", "news", "hey"))
    );

    server.await.unwrap();
    assert_eq!(deliveries.next().await, None);
    ctx.close().await.ok();
}

#[tokio::test]
async fn test_unreachable_backend_fails_health_check() {
    let (listener, addr) = fake_server().await;
    drop(listener);

    let backend = RedisBackend::new(addr, None);
    assert!(backend.new_subscription_context().await.is_err());
}

/// Accepts connections and never answers them. With `answer_first_ping`, the
/// first connection gets its health check answered before going quiet.
fn unresponsive_server(listener: TcpListener, answer_first_ping: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let mut conn = accept(&listener).await;
            if answer_first_ping && held.is_empty() {
                expect_command(&mut conn, &["PING"]).await;
                conn.send(RespFrame::SimpleString("PONG".into()))
                    .await
                    .unwrap();
            }
            held.push(conn);
        }
    })
}

fn short_timeout_backend(addr: String, password: Option<String>) -> RedisBackend {
    RedisBackend::new(addr, password).with_timeout(Duration::from_millis(200))
}

#[tokio::test]
async fn test_unresponsive_backend_operations_time_out() {
    let (listener, addr) = fake_server().await;
    let server = unresponsive_server(listener, false);
    let backend = short_timeout_backend(addr.clone(), None);

    let mut ctx = backend.new_subscription_context().await.unwrap();
    let started = Instant::now();
    assert!(matches!(ctx.ping().await, Err(BridgeError::Exec(_))));
    assert!(started.elapsed() < Duration::from_secs(2));

    let started = Instant::now();
    assert!(matches!(
        backend.publish("news", "hello").await,
        Err(BridgeError::Exec(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    ctx.close().await.ok();

    // Authentication is part of connecting and bounded the same way.
    let authenticating = short_timeout_backend(addr, Some("s3cret".into()));
    assert!(matches!(
        authenticating.new_subscription_context().await,
        Err(BridgeError::Exec(_))
    ));
    server.abort();
}

#[tokio::test]
async fn test_connection_returns_when_backend_never_answers_health_check() {
    init_tracing();
    let (listener, addr) = fake_server().await;
    let server = unresponsive_server(listener, false);
    let (transport, peer) = mock_transport();
    let handler = ConnectionHandler::new(
        transport,
        Arc::new(short_timeout_backend(addr, None)),
        fast_config(),
        1,
        peer_addr(),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), handler.run())
        .await
        .expect("run() must return when the backend is silent");
    assert!(matches!(result, Err(BridgeError::HealthCheck(_))));
    assert_eq!(peer.close_count(), 1);
    server.abort();
}

#[tokio::test]
async fn test_stalled_publish_does_not_block_the_inbound_loop() {
    init_tracing();
    let (listener, addr) = fake_server().await;
    let server = unresponsive_server(listener, true);
    let (transport, peer) = mock_transport();
    let handler = ConnectionHandler::new(
        transport,
        Arc::new(short_timeout_backend(addr, None)),
        fast_config(),
        1,
        peer_addr(),
    );
    let task = tokio::spawn(handler.run());

    // The publish connection never replies; the close behind it must still be read.
    peer.send("publish news nobody answers");
    peer.close();

    let cause = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run() must return after the client closes")
        .unwrap()
        .unwrap();
    assert_eq!(
        cause,
        ShutdownCause::ReadFailed(BridgeError::ConnectionClosed.to_string())
    );
    assert_eq!(peer.close_count(), 1);
    server.abort();
}
