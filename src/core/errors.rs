// src/core/errors.rs

//! Defines the primary error type for the bridge.

use std::sync::Arc;
use thiserror::Error;

/// The coarse error categories a connection reacts to.
///
/// `Parse` and `Exec` failures are logged and the connection keeps running.
/// `Transport` and `BackendDisconnect` failures end the connection.
/// `HealthCheck` failures end it before any loop has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::AsRefStr, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Exec,
    Transport,
    BackendDisconnect,
    HealthCheck,
}

/// The main error enum, representing all possible failures within the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    // --- Command protocol ---
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown command '{0}'")]
    UnknownVerb(String),

    #[error("No channels given for '{0}' command")]
    EmptyChannelList(String),

    // --- Backend ---
    #[error("Backend rejected operation: {0}")]
    Exec(String),

    #[error("Backend connection lost")]
    BackendDisconnected,

    #[error("Backend health check failed: {0}")]
    HealthCheck(String),

    // --- Transport ---
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    // --- RESP codec ---
    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Maps the error onto the category that decides how a connection reacts to it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::MalformedCommand(_)
            | BridgeError::UnknownVerb(_)
            | BridgeError::EmptyChannelList(_) => ErrorKind::Parse,
            BridgeError::Exec(_) => ErrorKind::Exec,
            BridgeError::BackendDisconnected => ErrorKind::BackendDisconnect,
            BridgeError::HealthCheck(_) => ErrorKind::HealthCheck,
            BridgeError::Transport(_)
            | BridgeError::DeadlineExceeded
            | BridgeError::ConnectionClosed
            | BridgeError::FrameTooLarge { .. }
            | BridgeError::Io(_)
            | BridgeError::IncompleteData
            | BridgeError::Protocol(_) => ErrorKind::Transport,
        }
    }

    /// Returns true for disconnects that are part of a normal client lifecycle
    /// and are not worth more than a debug log line.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            BridgeError::ConnectionClosed => true,
            BridgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for BridgeError {
    fn clone(&self) -> Self {
        match self {
            BridgeError::MalformedCommand(s) => BridgeError::MalformedCommand(s.clone()),
            BridgeError::UnknownVerb(s) => BridgeError::UnknownVerb(s.clone()),
            BridgeError::EmptyChannelList(s) => BridgeError::EmptyChannelList(s.clone()),
            BridgeError::Exec(s) => BridgeError::Exec(s.clone()),
            BridgeError::BackendDisconnected => BridgeError::BackendDisconnected,
            BridgeError::HealthCheck(s) => BridgeError::HealthCheck(s.clone()),
            BridgeError::Transport(s) => BridgeError::Transport(s.clone()),
            BridgeError::DeadlineExceeded => BridgeError::DeadlineExceeded,
            BridgeError::ConnectionClosed => BridgeError::ConnectionClosed,
            BridgeError::FrameTooLarge { size, limit } => BridgeError::FrameTooLarge {
                size: *size,
                limit: *limit,
            },
            BridgeError::Io(e) => BridgeError::Io(Arc::clone(e)),
            BridgeError::IncompleteData => BridgeError::IncompleteData,
            BridgeError::Protocol(s) => BridgeError::Protocol(s.clone()),
        }
    }
}

impl PartialEq for BridgeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BridgeError::MalformedCommand(a), BridgeError::MalformedCommand(b)) => a == b,
            (BridgeError::UnknownVerb(a), BridgeError::UnknownVerb(b)) => a == b,
            (BridgeError::EmptyChannelList(a), BridgeError::EmptyChannelList(b)) => a == b,
            (BridgeError::Exec(a), BridgeError::Exec(b)) => a == b,
            (BridgeError::HealthCheck(a), BridgeError::HealthCheck(b)) => a == b,
            (BridgeError::Transport(a), BridgeError::Transport(b)) => a == b,
            (BridgeError::Protocol(a), BridgeError::Protocol(b)) => a == b,
            (BridgeError::Io(a), BridgeError::Io(b)) => a.to_string() == b.to_string(),
            (
                BridgeError::FrameTooLarge { size: s1, limit: l1 },
                BridgeError::FrameTooLarge { size: s2, limit: l2 },
            ) => s1 == s2 && l1 == l2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(Arc::new(e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        use tokio_tungstenite::tungstenite::error::CapacityError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => BridgeError::ConnectionClosed,
            WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                BridgeError::FrameTooLarge {
                    size,
                    limit: max_size,
                }
            }
            WsError::Io(io) => BridgeError::Io(Arc::new(io)),
            other => BridgeError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Protocol(format!("JSON serialization error: {e}"))
    }
}
