// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection bookkeeping.

use crate::core::metrics;
use std::net::SocketAddr;
use tracing::debug;

/// Keeps the connected-clients gauge accurate however a connection handler's
/// scope is exited, panics included.
pub struct ConnectionGuard {
    /// The unique identifier for the client session.
    pub(crate) session_id: u64,
    /// The network address of the client.
    pub(crate) addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(session_id: u64, addr: SocketAddr) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self { session_id, addr }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping for session {} ({}).",
            self.session_id, self.addr
        );
    }
}
