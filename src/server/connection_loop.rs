// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::config::BridgeConfig;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use crate::core::pubsub::PubSubBackend;
use crate::core::transport::{WebSocketTransport, websocket_config};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long connections get to finish their teardown once shutdown starts.
///
/// A connection notices the shutdown at its next read, which is bounded by the
/// pong wait, and its close is bounded by the write wait.
pub(crate) fn shutdown_grace_period(bridge: &BridgeConfig) -> Duration {
    bridge.pong_wait + bridge.write_wait + Duration::from_secs(1)
}

/// The main server loop that accepts connections and handles graceful shutdown.
///
/// Runs until SIGINT, SIGTERM, cancellation of the context's shutdown token,
/// or the failure of a background task.
pub async fn run<B: PubSubBackend>(mut ctx: ServerContext<B>) -> Result<()> {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = ctx.shutdown.cancelled() => {
                info!("Shutdown requested, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {:#}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                let Ok(permit) = ctx.client_limit.clone().try_acquire_owned() else {
                    warn!("Rejecting connection from {}: max_clients ({}) reached.", addr, ctx.config.max_clients);
                    metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                    continue;
                };

                session_id_counter = session_id_counter.wrapping_add(1);
                debug!("Accepted new connection from {} as session {}.", addr, session_id_counter);
                client_tasks.spawn(serve_socket(
                    socket,
                    addr,
                    session_id_counter,
                    ctx.backend.clone(),
                    ctx.config.bridge.clone(),
                    ctx.shutdown.clone(),
                    permit,
                ));
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Signalling {} connection(s).", client_tasks.len());
    ctx.shutdown.cancel();

    let grace_period = shutdown_grace_period(&ctx.config.bridge);
    let drained = tokio::time::timeout(grace_period, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} connection(s) still open after {:?}, aborting them.",
            client_tasks.len(),
            grace_period
        );
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}

/// Upgrades an accepted socket to a WebSocket and runs its connection to completion.
async fn serve_socket<B: PubSubBackend>(
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    backend: Arc<B>,
    bridge: BridgeConfig,
    shutdown: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let upgrade = tokio::time::timeout(
        bridge.pong_wait,
        tokio_tungstenite::accept_async_with_config(
            socket,
            Some(websocket_config(bridge.max_frame_size)),
        ),
    );
    let stream = match upgrade.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("WebSocket handshake error for {}: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out.", addr);
            return;
        }
    };

    let handler = ConnectionHandler::new(
        WebSocketTransport::new(stream),
        backend,
        bridge,
        session_id,
        addr,
    )
    .with_server_shutdown(shutdown);
    match handler.run().await {
        Ok(cause) => debug!("Connection from {} finished: {}", addr, cause),
        Err(e) => warn!("Connection from {} terminated unexpectedly: {}", addr, e),
    }
}
