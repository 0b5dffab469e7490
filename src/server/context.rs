// src/server/context.rs

use crate::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext<B> {
    pub config: Arc<Config>,
    pub listener: TcpListener,
    pub backend: Arc<B>,
    /// Cancelled when the server starts shutting down; every connection watches it.
    pub shutdown: CancellationToken,
    /// One permit per connected client, `max_clients` in total.
    pub client_limit: Arc<Semaphore>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
