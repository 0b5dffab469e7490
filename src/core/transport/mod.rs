// src/core/transport/mod.rs

//! The framed, bidirectional client connection.
//!
//! A transport is split once into a read half and a write half. The read half
//! belongs to the inbound loop and the write half to the outbound loop, so
//! neither side needs a lock.

use crate::core::BridgeError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

pub mod websocket;

pub use websocket::{WebSocketTransport, websocket_config};

/// Invoked by a reader whenever the peer acknowledges a keepalive ping.
/// Returns the new read deadline.
pub type PongHandler = Box<dyn FnMut() -> Instant + Send>;

/// A client connection that can be split into independently owned halves.
pub trait Transport: Send + 'static {
    type Reader: FrameReader + 'static;
    type Writer: FrameWriter + 'static;

    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// The read half of a transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Frames larger than `limit` bytes fail the read with `FrameTooLarge`.
    fn set_max_frame_size(&mut self, limit: usize);

    /// Reads blocked past `deadline` fail with `DeadlineExceeded`.
    fn set_read_deadline(&mut self, deadline: Instant);

    /// Installs the handler run on every pong. Its return value becomes the
    /// new read deadline.
    fn on_pong(&mut self, handler: PongHandler);

    /// Waits for the next data frame. Control frames are handled internally.
    async fn read_frame(&mut self) -> Result<Bytes, BridgeError>;
}

/// The write half of a transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Writes blocked past `deadline` fail with `DeadlineExceeded`.
    fn set_write_deadline(&mut self, deadline: Instant);

    /// Writes one data frame.
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), BridgeError>;

    /// Writes one keepalive ping.
    async fn write_ping(&mut self) -> Result<(), BridgeError>;

    /// Closes the connection. Consumes the writer so a connection is closed at most once.
    async fn close(self) -> Result<(), BridgeError>
    where
        Self: Sized;
}

/// Runs `fut` until `deadline`, if one is set.
pub(crate) async fn with_deadline<F, T>(deadline: Option<Instant>, fut: F) -> Result<T, BridgeError>
where
    F: std::future::Future<Output = Result<T, BridgeError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| BridgeError::DeadlineExceeded)?,
        None => fut.await,
    }
}
