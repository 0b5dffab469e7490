// src/core/transport/websocket.rs

//! `Transport` implementation over a `tokio-tungstenite` WebSocket.

use super::{FrameReader, FrameWriter, PongHandler, Transport, with_deadline};
use crate::core::BridgeError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

/// Protocol settings for accepted connections. Messages and frames larger
/// than `max_frame_size` are refused as soon as their header is read, before
/// the payload is buffered.
pub fn websocket_config(max_frame_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_frame_size))
        .max_frame_size(Some(max_frame_size))
}

/// A WebSocket connection whose upgrade has already completed.
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WebSocketReader<S>;
    type Writer = WebSocketWriter<S>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (
            WebSocketReader {
                stream,
                max_frame_size: None,
                read_deadline: None,
                pong_handler: None,
            },
            WebSocketWriter {
                sink,
                write_deadline: None,
            },
        )
    }
}

pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    max_frame_size: Option<usize>,
    read_deadline: Option<Instant>,
    pong_handler: Option<PongHandler>,
}

impl<S> WebSocketReader<S> {
    // The protocol limit from `websocket_config` normally rejects oversized
    // messages first; this covers streams accepted without it.
    fn check_size(&self, frame: Bytes) -> Result<Bytes, BridgeError> {
        match self.max_frame_size {
            Some(limit) if frame.len() > limit => Err(BridgeError::FrameTooLarge {
                size: frame.len(),
                limit,
            }),
            _ => Ok(frame),
        }
    }
}

#[async_trait]
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn set_max_frame_size(&mut self, limit: usize) {
        self.max_frame_size = Some(limit);
    }

    fn set_read_deadline(&mut self, deadline: Instant) {
        self.read_deadline = Some(deadline);
    }

    fn on_pong(&mut self, handler: PongHandler) {
        self.pong_handler = Some(handler);
    }

    async fn read_frame(&mut self) -> Result<Bytes, BridgeError> {
        loop {
            let deadline = self.read_deadline;
            let stream = &mut self.stream;
            let next = with_deadline(deadline, async { Ok(stream.next().await) }).await?;

            let message = match next {
                Some(message) => message?,
                None => return Err(BridgeError::ConnectionClosed),
            };

            match message {
                Message::Text(text) => {
                    return self.check_size(Bytes::copy_from_slice(text.as_str().as_bytes()));
                }
                Message::Binary(data) => return self.check_size(data),
                Message::Pong(_) => {
                    if let Some(handler) = self.pong_handler.as_mut() {
                        self.read_deadline = Some(handler());
                    }
                }
                // tungstenite queues the pong reply and sends it with the next write.
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    return Err(BridgeError::ConnectionClosed);
                }
                Message::Frame(_) => {}
            }
        }
    }
}

pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    write_deadline: Option<Instant>,
}

impl<S> WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: Message) -> Result<(), BridgeError> {
        let sink = &mut self.sink;
        with_deadline(self.write_deadline, async {
            sink.send(message).await.map_err(BridgeError::from)
        })
        .await
    }
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn set_write_deadline(&mut self, deadline: Instant) {
        self.write_deadline = Some(deadline);
    }

    async fn write_frame(&mut self, frame: Bytes) -> Result<(), BridgeError> {
        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(frame),
        };
        self.send(message).await
    }

    async fn write_ping(&mut self) -> Result<(), BridgeError> {
        self.send(Message::Ping(Bytes::new())).await
    }

    async fn close(mut self) -> Result<(), BridgeError> {
        let sink = &mut self.sink;
        let result = with_deadline(self.write_deadline, async {
            sink.close().await.map_err(BridgeError::from)
        })
        .await;
        match result {
            Err(BridgeError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }
}
