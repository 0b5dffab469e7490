// tests/integration/lifecycle_test.rs

//! Integration tests for the connection lifecycle: command handling,
//! delivery forwarding, keepalive deadlines and teardown.

use super::test_helpers::{
    Inbound, MockPeer, Outbound, fast_config, init_tracing, mock_transport, peer_addr, wait_until,
};
use async_trait::async_trait;
use futures::StreamExt;
use pubsub_bridge::connection::{ConnectionHandler, ShutdownCause};
use pubsub_bridge::core::pubsub::memory::MemorySubscription;
use pubsub_bridge::core::pubsub::{MemoryBroker, PubSubBackend, SubscriptionContext};
use pubsub_bridge::core::{BridgeError, Delivery};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn start<B: PubSubBackend>(backend: Arc<B>) -> (JoinHandle<Result<ShutdownCause, BridgeError>>, MockPeer) {
    init_tracing();
    let (transport, peer) = mock_transport();
    let handler = ConnectionHandler::new(transport, backend, fast_config(), 1, peer_addr());
    (tokio::spawn(handler.run()), peer)
}

fn json(frame: &[u8]) -> serde_json::Value {
    serde_json::from_slice(frame).expect("delivery frames are JSON")
}

// ===== Delivery Forwarding =====

#[tokio::test(start_paused = true)]
async fn test_subscribe_and_receive_delivery() {
    let broker = MemoryBroker::new();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;

    assert_eq!(broker.deliver("x", "hi"), 1);
    let frame = peer.next_frame().await.unwrap();
    assert_eq!(&frame[..], br#"{"channel":"x","pattern":"","payload":"hi"}"#);

    peer.close();
    let cause = task.await.unwrap().unwrap();
    assert!(matches!(cause, ShutdownCause::ReadFailed(_)));
    assert_eq!(peer.close_count(), 1);
    assert_eq!(broker.context_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_deliveries_keep_backend_order() {
    let broker = MemoryBroker::new();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    peer.send("PSUBSCRIBE news.*");
    wait_until(|| broker.pattern_count() == 1).await;

    for topic in ["news.a", "news.b", "news.c"] {
        broker.deliver(topic, &format!("about {topic}"));
    }
    for topic in ["news.a", "news.b", "news.c"] {
        let value = json(&peer.next_frame().await.unwrap());
        assert_eq!(value["channel"], topic);
        assert_eq!(value["pattern"], "news.*");
        assert_eq!(value["payload"], format!("about {topic}"));
    }

    peer.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_forwarding() {
    let broker = MemoryBroker::new();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    peer.send("subscribe a b");
    wait_until(|| broker.subscriber_count("b") == 1).await;
    peer.send("unsubscribe a");
    wait_until(|| broker.subscriber_count("a") == 0).await;

    assert_eq!(broker.deliver("a", "dropped"), 0);
    broker.deliver("b", "kept");
    assert_eq!(json(&peer.next_frame().await.unwrap())["payload"], "kept");

    peer.close();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_publish_without_subscription_sends_nothing_back() {
    let broker = MemoryBroker::new();
    let mut observer = broker.new_subscription_context().await.unwrap();
    let mut observed = observer.deliveries().unwrap();
    observer.subscribe(&["news".to_string()]).await.unwrap();

    let (task, mut peer) = start(Arc::new(broker.clone()));
    peer.send("publish news hello there world");

    assert_eq!(
        observed.next().await,
        Some(Delivery::message("news", "hello there world"))
    );
    assert!(peer.outbound.try_recv().is_err());

    peer.close();
    task.await.unwrap().unwrap();
}

// ===== Non-fatal Errors =====

#[tokio::test(start_paused = true)]
async fn test_parse_errors_keep_connection_open() {
    let broker = MemoryBroker::new();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    peer.send("frobnicate x");
    peer.send("subscribe");
    peer.send("publish foo");
    peer.send("nonsense");
    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;
    assert!(!task.is_finished());

    broker.deliver("x", "still here");
    assert_eq!(json(&peer.next_frame().await.unwrap())["payload"], "still here");

    peer.close();
    task.await.unwrap().unwrap();
}

/// Accepts subscriptions but rejects every publish.
struct ReadOnlyBackend {
    inner: MemoryBroker,
}

#[async_trait]
impl PubSubBackend for ReadOnlyBackend {
    type Context = MemorySubscription;

    async fn new_subscription_context(&self) -> Result<MemorySubscription, BridgeError> {
        self.inner.new_subscription_context().await
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Exec("READONLY publishing disabled".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_exec_errors_keep_connection_open() {
    let broker = MemoryBroker::new();
    let backend = Arc::new(ReadOnlyBackend {
        inner: broker.clone(),
    });
    let (task, mut peer) = start(backend);

    peer.send("publish x rejected");
    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;
    assert!(!task.is_finished());

    broker.deliver("x", "after error");
    assert_eq!(json(&peer.next_frame().await.unwrap())["payload"], "after error");

    peer.close();
    task.await.unwrap().unwrap();
}

// ===== Keepalive =====

#[tokio::test(start_paused = true)]
async fn test_missing_pong_fails_read_within_pong_wait() {
    let broker = MemoryBroker::new();
    let started = Instant::now();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    let cause = task.await.unwrap().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        cause,
        ShutdownCause::ReadFailed(BridgeError::DeadlineExceeded.to_string())
    );
    assert!(elapsed >= Duration::from_secs(2), "closed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "closed too late: {elapsed:?}");
    // The ping at one second went unanswered.
    assert_eq!(peer.outbound.recv().await, Some(Outbound::Ping));
    assert_eq!(peer.close_count(), 1);
    assert_eq!(broker.context_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_connection_alive_and_pings_are_periodic() {
    let broker = MemoryBroker::new();
    let started = Instant::now();
    let (task, peer) = start(Arc::new(broker.clone()));

    let MockPeer {
        inbound,
        mut outbound,
        closes,
        ..
    } = peer;
    let ponger_inbound = inbound.clone();
    let ponger = tokio::spawn(async move {
        let mut ping_times = Vec::new();
        while let Some(out) = outbound.recv().await {
            if out == Outbound::Ping {
                ping_times.push(started.elapsed());
                let _ = ponger_inbound.send(Inbound::Pong);
            }
        }
        ping_times
    });

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert!(!task.is_finished());

    inbound.send(Inbound::Close).unwrap();
    let cause = task.await.unwrap().unwrap();
    assert_eq!(
        cause,
        ShutdownCause::ReadFailed(BridgeError::ConnectionClosed.to_string())
    );

    let ping_times = ponger.await.unwrap();
    assert_eq!(ping_times.len(), 10);
    for (i, at) in ping_times.iter().enumerate() {
        assert_eq!(*at, Duration::from_secs(i as u64 + 1));
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_frame_ends_connection() {
    let broker = MemoryBroker::new();
    let (task, peer) = start(Arc::new(broker));

    peer.send(&format!("publish big {}", "x".repeat(1024)));
    let cause = task.await.unwrap().unwrap();
    match cause {
        ShutdownCause::ReadFailed(reason) => assert!(reason.contains("exceeds"), "{reason}"),
        other => panic!("expected a read failure, got {other:?}"),
    }
}

// ===== Shutdown Coordination =====

#[tokio::test(start_paused = true)]
async fn test_backend_disconnect_closes_without_inbound_activity() {
    let broker = MemoryBroker::new();
    let (task, peer) = start(Arc::new(broker.clone()));

    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;

    broker.disconnect();
    let cause = task.await.unwrap().unwrap();
    assert_eq!(cause, ShutdownCause::BackendDisconnected);
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_tear_down_once() {
    let broker = MemoryBroker::new();
    let (task, peer) = start(Arc::new(broker.clone()));

    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;

    // Fail both loops at the same moment.
    peer.fail_writes.store(true, Ordering::SeqCst);
    broker.deliver("x", "unwritable");
    peer.close();

    let cause = task.await.unwrap().unwrap();
    assert!(
        matches!(
            cause,
            ShutdownCause::ReadFailed(_) | ShutdownCause::WriteFailed(_)
        ),
        "unexpected cause {cause:?}"
    );
    assert_eq!(peer.close_count(), 1);
    assert_eq!(broker.context_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_ends_connection() {
    let broker = MemoryBroker::new();
    let (task, peer) = start(Arc::new(broker.clone()));

    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;
    peer.fail_writes.store(true, Ordering::SeqCst);
    broker.deliver("x", "unwritable");

    // The inbound loop only notices once its read deadline passes.
    let cause = task.await.unwrap().unwrap();
    assert_eq!(
        cause,
        ShutdownCause::WriteFailed(BridgeError::Transport("broken pipe".into()).to_string())
    );
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_shutdown_token_ends_connection() {
    init_tracing();
    let broker = MemoryBroker::new();
    let token = CancellationToken::new();
    let (transport, peer) = mock_transport();
    let handler = ConnectionHandler::new(
        transport,
        Arc::new(broker.clone()),
        fast_config(),
        7,
        peer_addr(),
    )
    .with_server_shutdown(token.clone());
    let task = tokio::spawn(handler.run());

    peer.send("subscribe x");
    wait_until(|| broker.subscriber_count("x") == 1).await;

    token.cancel();
    let cause = task.await.unwrap().unwrap();
    assert_eq!(cause, ShutdownCause::ServerShutdown);
    assert_eq!(peer.close_count(), 1);
    assert_eq!(broker.context_count(), 0);
}

// ===== Startup =====

#[tokio::test(start_paused = true)]
async fn test_failed_health_check_closes_immediately() {
    let broker = MemoryBroker::new();
    broker.disconnect();
    let started = Instant::now();
    let (task, mut peer) = start(Arc::new(broker.clone()));

    let result = task.await.unwrap();
    assert!(matches!(result, Err(BridgeError::HealthCheck(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(peer.close_count(), 1);
    assert!(peer.outbound.try_recv().is_err());
    assert_eq!(broker.context_count(), 0);
}
