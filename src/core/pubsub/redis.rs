// src/core/pubsub/redis.rs

//! A publish/subscribe backend speaking RESP2 to a Redis-compatible server.
//!
//! Every subscription context owns a dedicated connection, since a connection
//! in subscribed mode cannot issue regular commands. Publishing goes through
//! one shared connection.
//!
//! Every exchange with the server is bounded by the backend timeout. A server
//! that accepts connections but never answers fails operations with `Exec`
//! instead of stalling the connection that issued them.

use super::{PubSubBackend, SubscriptionContext};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::{BridgeError, Delivery};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

type RespConnection = Framed<TcpStream, RespFrameCodec>;

/// How long a single backend exchange may take unless configured otherwise.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Connects to a Redis-compatible server at `addr`.
pub struct RedisBackend {
    addr: String,
    password: Option<String>,
    timeout: Duration,
    publisher: Mutex<Option<RespConnection>>,
}

impl RedisBackend {
    pub fn new(addr: impl Into<String>, password: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            password,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            publisher: Mutex::new(None),
        }
    }

    /// Bounds connecting, authenticating and every command exchange by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<RespConnection, BridgeError> {
        within(self.timeout, "connect", async {
            let socket = TcpStream::connect(&self.addr).await?;
            socket.set_nodelay(true)?;
            let mut conn = Framed::new(socket, RespFrameCodec);

            if let Some(password) = &self.password {
                conn.send(RespFrame::command(["AUTH", password.as_str()]))
                    .await?;
                match next_reply(&mut conn).await? {
                    RespFrame::SimpleString(_) => {}
                    RespFrame::Error(e) => return Err(BridgeError::Exec(e)),
                    other => {
                        return Err(BridgeError::Protocol(format!(
                            "unexpected AUTH reply: {other:?}"
                        )));
                    }
                }
            }
            Ok(conn)
        })
        .await?
        .map(|conn| {
            debug!("Connected to backend at {}.", self.addr);
            conn
        })
    }
}

/// Runs one backend exchange, failing with `Exec` once `timeout` has passed.
async fn within<T, F>(
    timeout: Duration,
    what: &str,
    fut: F,
) -> Result<Result<T, BridgeError>, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| BridgeError::Exec(format!("backend {what} timed out after {timeout:?}")))
}

/// Reads the next frame, treating the end of the stream as a lost backend.
async fn next_reply<S>(stream: &mut S) -> Result<RespFrame, BridgeError>
where
    S: Stream<Item = Result<RespFrame, BridgeError>> + Unpin,
{
    stream
        .next()
        .await
        .unwrap_or(Err(BridgeError::BackendDisconnected))
}

#[async_trait]
impl PubSubBackend for RedisBackend {
    type Context = RedisSubscription;

    async fn new_subscription_context(&self) -> Result<Self::Context, BridgeError> {
        let (sink, stream) = self.connect().await?.split();
        Ok(RedisSubscription {
            sink,
            stream: Some(stream),
            timeout: self.timeout,
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError> {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            let conn = self
                .connect()
                .await
                .map_err(|e| BridgeError::Exec(format!("backend unreachable: {e}")))?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(BridgeError::BackendDisconnected);
        };

        let exchange = async {
            conn.send(RespFrame::command(["PUBLISH", channel, payload]))
                .await?;
            next_reply(conn).await
        };

        match within(self.timeout, "PUBLISH", exchange).await {
            Ok(Ok(RespFrame::Integer(receivers))) => {
                debug!("Published to '{}', {} receiver(s).", channel, receivers);
                Ok(())
            }
            // The server refused the command; the connection itself is fine.
            Ok(Ok(RespFrame::Error(e))) => Err(BridgeError::Exec(e)),
            other => {
                // Drop the connection so the next publish starts from a clean one.
                // A reply that arrives after a timeout would otherwise be read as
                // the answer to the next command.
                *guard = None;
                Err(match other {
                    Ok(Ok(frame)) => {
                        BridgeError::Exec(format!("unexpected PUBLISH reply: {frame:?}"))
                    }
                    Ok(Err(e)) => BridgeError::Exec(e.to_string()),
                    Err(timed_out) => timed_out,
                })
            }
        }
    }
}

/// A dedicated subscriber connection.
pub struct RedisSubscription {
    sink: SplitSink<RespConnection, RespFrame>,
    stream: Option<SplitStream<RespConnection>>,
    timeout: Duration,
}

impl RedisSubscription {
    async fn send_command(&mut self, verb: &str, names: &[String]) -> Result<(), BridgeError> {
        let frame = RespFrame::command(std::iter::once(verb).chain(names.iter().map(String::as_str)));
        let sink = &mut self.sink;
        within(self.timeout, verb, async {
            sink.send(frame)
                .await
                .map_err(|e| BridgeError::Exec(format!("{verb} failed: {e}")))
        })
        .await?
    }
}

#[async_trait]
impl SubscriptionContext for RedisSubscription {
    type Deliveries = RedisDeliveries;

    async fn ping(&mut self) -> Result<(), BridgeError> {
        let sink = &mut self.sink;
        // Once the delivery stream is handed out the reply is consumed there.
        let stream = self.stream.as_mut();
        within(self.timeout, "PING", async move {
            sink.send(RespFrame::command(["PING"])).await?;
            let Some(stream) = stream else {
                return Ok(());
            };
            match next_reply(stream).await? {
                RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
                frame if is_push_of_kind(&frame, "pong") => Ok(()),
                RespFrame::Error(e) => Err(BridgeError::Exec(e)),
                other => Err(BridgeError::Protocol(format!(
                    "unexpected PING reply: {other:?}"
                ))),
            }
        })
        .await?
    }

    async fn subscribe(&mut self, channels: &[String]) -> Result<(), BridgeError> {
        self.send_command("SUBSCRIBE", channels).await
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError> {
        self.send_command("PSUBSCRIBE", patterns).await
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), BridgeError> {
        self.send_command("UNSUBSCRIBE", channels).await
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), BridgeError> {
        self.send_command("PUNSUBSCRIBE", patterns).await
    }

    fn deliveries(&mut self) -> Option<Self::Deliveries> {
        self.stream.take().map(|inner| RedisDeliveries {
            inner,
            finished: false,
        })
    }

    async fn close(mut self) -> Result<(), BridgeError> {
        within(self.timeout, "close", self.sink.close()).await?
    }
}

/// The push messages arriving on a subscriber connection, filtered down to
/// actual messages.
pub struct RedisDeliveries {
    inner: SplitStream<RespConnection>,
    finished: bool,
}

impl Stream for RedisDeliveries {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        if self.finished {
            return Poll::Ready(None);
        }
        loop {
            match futures::ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(frame)) => {
                    if let Some(delivery) = delivery_from_push(frame) {
                        return Poll::Ready(Some(delivery));
                    }
                }
                Some(Err(e)) => {
                    warn!("Backend stream failed: {}", e);
                    self.finished = true;
                    return Poll::Ready(None);
                }
                None => {
                    self.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

fn is_push_of_kind(frame: &RespFrame, kind: &str) -> bool {
    match frame {
        RespFrame::Array(items) => items
            .first()
            .and_then(RespFrame::as_text)
            .is_some_and(|k| k.eq_ignore_ascii_case(kind)),
        _ => false,
    }
}

/// Turns a `message`/`pmessage` push into a `Delivery`. Everything else a
/// subscriber connection receives is acknowledged and skipped.
fn delivery_from_push(frame: RespFrame) -> Option<Delivery> {
    let items = match frame {
        RespFrame::Array(items) => items,
        RespFrame::Error(e) => {
            warn!("Backend replied with an error: {}", e);
            return None;
        }
        other => {
            debug!("Ignoring backend frame: {:?}", other);
            return None;
        }
    };

    let texts: Vec<String> = items.iter().filter_map(RespFrame::as_text).collect();
    if texts.len() != items.len() {
        debug!("Ignoring push with non-string elements: {:?}", items);
        return None;
    }

    match texts.as_slice() {
        [kind, channel, payload] if kind.eq_ignore_ascii_case("message") => {
            Some(Delivery::message(channel.as_str(), payload.as_str()))
        }
        [kind, pattern, channel, payload] if kind.eq_ignore_ascii_case("pmessage") => Some(
            Delivery::pmessage(pattern.as_str(), channel.as_str(), payload.as_str()),
        ),
        _ => {
            debug!("Skipping backend push: {:?}", texts.first());
            None
        }
    }
}
