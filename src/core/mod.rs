// src/core/mod.rs

//! The central module containing the command protocol, the data model, and the
//! transport and backend interfaces a connection is built on.

pub mod command;
pub mod delivery;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod pubsub;
pub mod transport;

pub use command::{Command, CommandKind};
pub use delivery::Delivery;
pub use errors::{BridgeError, ErrorKind};
