// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: the read and write
//! loops, their shared shutdown signal, and ordered teardown.

mod guard;
mod handler;
mod shutdown;
mod state;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use shutdown::{ShutdownCause, ShutdownSignal};
pub use state::ConnectionState;
