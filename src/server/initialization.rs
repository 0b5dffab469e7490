// src/server/initialization.rs

//! Builds the server context: listener bookkeeping, client limit, and the
//! background tasks that run next to the accept loop.

use super::context::ServerContext;
use super::metrics_server::run_metrics_server;
use crate::config::{BackendConfig, Config};
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub fn setup<B>(
    config: Config,
    listener: TcpListener,
    backend: Arc<B>,
    shutdown: CancellationToken,
) -> Result<ServerContext<B>> {
    log_startup_info(&config);
    if let Ok(addr) = listener.local_addr() {
        info!("Pub/sub bridge listening on ws://{}", addr);
    }

    let mut background_tasks = JoinSet::new();
    if config.metrics.enabled {
        background_tasks.spawn(run_metrics_server(config.metrics.port, shutdown.clone()));
    }

    let client_limit = Arc::new(Semaphore::new(config.max_clients));
    Ok(ServerContext {
        config: Arc::new(config),
        listener,
        backend,
        shutdown,
        client_limit,
        background_tasks,
    })
}

fn log_startup_info(config: &Config) {
    match &config.backend {
        BackendConfig::Redis {
            host,
            port,
            timeout,
            ..
        } => info!(
            "Using Redis-compatible backend at {}:{} (timeout {:?}).",
            host, port, timeout
        ),
        BackendConfig::Memory => info!("Using in-process memory broker."),
    }
    let bridge = &config.bridge;
    info!(
        "Keepalive: ping every {:?}, pong wait {:?}, write wait {:?}, max frame {} bytes.",
        bridge.ping_period, bridge.pong_wait, bridge.write_wait, bridge.max_frame_size
    );
    info!("Accepting up to {} clients.", config.max_clients);
}
