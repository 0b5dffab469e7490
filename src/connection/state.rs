// src/connection/state.rs

//! The connection state machine.

use std::fmt;

/// `Initializing -> Running -> Draining -> Closed`, or `Initializing -> Closed`
/// when the backend health check fails. No state is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Running,
    Draining,
    Closed,
}

impl ConnectionState {
    /// Returns whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Initializing, Running) | (Initializing, Closed) | (Running, Draining) | (Draining, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Running => "running",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
