// src/connection/shutdown.rs

//! The fire-once signal that ends a connection's loops.

use std::fmt;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Why a connection was shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The inbound loop failed to read a frame (deadline, close, transport error).
    ReadFailed(String),
    /// The outbound loop failed to write a frame or ping.
    WriteFailed(String),
    /// The backend's delivery stream ended.
    BackendDisconnected,
    /// The server is shutting down.
    ServerShutdown,
}

impl ShutdownCause {
    /// A short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ShutdownCause::ReadFailed(_) => "read_failed",
            ShutdownCause::WriteFailed(_) => "write_failed",
            ShutdownCause::BackendDisconnected => "backend_disconnected",
            ShutdownCause::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::ReadFailed(reason) => write!(f, "read failed: {reason}"),
            ShutdownCause::WriteFailed(reason) => write!(f, "write failed: {reason}"),
            ShutdownCause::BackendDisconnected => f.write_str("backend disconnected"),
            ShutdownCause::ServerShutdown => f.write_str("server shutdown"),
        }
    }
}

/// A single-assignment broadcast. The first `fire` wins and every observer
/// sees it; later requests are dropped.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    cause: OnceLock<ShutdownCause>,
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns `true` if this call fired the signal.
    pub fn fire(&self, cause: ShutdownCause) -> bool {
        let won = self.cause.set(cause).is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has fired. Cancel-safe.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }

    /// The cause that won, if the signal has fired.
    pub fn cause(&self) -> Option<&ShutdownCause> {
        self.cause.get()
    }
}
