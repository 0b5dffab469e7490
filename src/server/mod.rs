// src/server/mod.rs

//! Application wiring: listener, backend selection, and the accept loop.

use crate::config::{BackendConfig, Config};
use crate::core::pubsub::{MemoryBroker, PubSubBackend, RedisBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;

pub use context::ServerContext;

/// The main server startup function: binds the listener, builds the configured
/// backend and serves until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
    let shutdown = CancellationToken::new();

    match config.backend.clone() {
        BackendConfig::Redis {
            host,
            port,
            password,
            timeout,
        } => {
            let backend =
                Arc::new(RedisBackend::new(format!("{host}:{port}"), password).with_timeout(timeout));
            serve(config, listener, backend, shutdown).await
        }
        BackendConfig::Memory => {
            serve(config, listener, Arc::new(MemoryBroker::new()), shutdown).await
        }
    }
}

/// Serves WebSocket clients from `listener` against `backend` until `shutdown`
/// is cancelled or the process is signalled.
pub async fn serve<B: PubSubBackend>(
    config: Config,
    listener: TcpListener,
    backend: Arc<B>,
    shutdown: CancellationToken,
) -> Result<()> {
    let server_context = initialization::setup(config, listener, backend, shutdown)?;
    connection_loop::run(server_context).await
}
