// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.
//!
//! A running connection is three futures joined in one scope: the inbound loop
//! reads frames and executes commands, the outbound loop writes deliveries and
//! keepalive pings, and the coordinator waits for the first shutdown request.
//! Each resource has exactly one owner while the loops run, so no locks are
//! needed. The subscription context and the transport are closed only after
//! all three have returned.

use super::guard::ConnectionGuard;
use super::shutdown::{ShutdownCause, ShutdownSignal};
use super::state::ConnectionState;
use crate::config::BridgeConfig;
use crate::core::metrics;
use crate::core::pubsub::{PubSubBackend, SubscriptionContext};
use crate::core::transport::{FrameReader, FrameWriter, Transport};
use crate::core::{BridgeError, Command, Delivery};
use futures::{Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler<T: Transport, B: PubSubBackend> {
    transport: T,
    backend: Arc<B>,
    config: BridgeConfig,
    session_id: u64,
    addr: SocketAddr,
    server_shutdown: CancellationToken,
    state: ConnectionState,
}

impl<T: Transport, B: PubSubBackend> ConnectionHandler<T, B> {
    /// Creates a new `ConnectionHandler` for an already upgraded connection.
    pub fn new(
        transport: T,
        backend: Arc<B>,
        config: BridgeConfig,
        session_id: u64,
        addr: SocketAddr,
    ) -> Self {
        Self {
            transport,
            backend,
            config,
            session_id,
            addr,
            server_shutdown: CancellationToken::new(),
            state: ConnectionState::Initializing,
        }
    }

    /// Shuts the connection down with `ServerShutdown` once `token` is cancelled.
    pub fn with_server_shutdown(mut self, token: CancellationToken) -> Self {
        self.server_shutdown = token;
        self
    }

    /// Runs the connection to completion.
    ///
    /// Returns the cause that won the shutdown race. Fails with `HealthCheck`
    /// if the backend could not be reached at startup, in which case no loop
    /// was started. Either way the transport and the subscription context
    /// have been closed when this returns.
    pub async fn run(self) -> Result<ShutdownCause, BridgeError> {
        let _guard = ConnectionGuard::new(self.session_id, self.addr);
        let ConnectionHandler {
            transport,
            backend,
            config,
            session_id,
            addr,
            server_shutdown,
            mut state,
        } = self;
        let (mut reader, mut writer) = transport.into_split();

        let (mut ctx, deliveries) = match open_context(backend.as_ref()).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(
                    "Session {} ({}): backend health check failed: {}",
                    session_id, addr, e
                );
                writer.set_write_deadline(Instant::now() + config.write_wait);
                if let Err(close_err) = writer.close().await {
                    debug!("Session {}: error closing transport: {}", session_id, close_err);
                }
                transition(&mut state, ConnectionState::Closed, session_id);
                return Err(BridgeError::HealthCheck(e.to_string()));
            }
        };

        transition(&mut state, ConnectionState::Running, session_id);
        info!("Session {} ({}) is running.", session_id, addr);

        let signal = ShutdownSignal::new();
        let ((), (), cause) = tokio::join!(
            inbound_loop(
                &mut reader,
                &mut ctx,
                backend.as_ref(),
                &config,
                &signal,
                session_id,
            ),
            outbound_loop(&mut writer, deliveries, &config, &signal, session_id),
            coordinate(&signal, &server_shutdown),
        );

        // Both loops have returned; nothing touches the context or the transport anymore.
        transition(&mut state, ConnectionState::Draining, session_id);
        if let Err(e) = ctx.close().await {
            debug!("Session {}: error closing subscription context: {}", session_id, e);
        }
        writer.set_write_deadline(Instant::now() + config.write_wait);
        if let Err(e) = writer.close().await {
            debug!("Session {}: error closing transport: {}", session_id, e);
        }
        drop(reader);
        transition(&mut state, ConnectionState::Closed, session_id);
        debug_assert!(state.is_terminal());

        metrics::CONNECTIONS_CLOSED_TOTAL
            .with_label_values(&[cause.label()])
            .inc();
        info!("Session {} ({}) closed: {}.", session_id, addr, cause);
        Ok(cause)
    }
}

type Deliveries<B> = <<B as PubSubBackend>::Context as SubscriptionContext>::Deliveries;

/// Creates a subscription context, health-checks it and takes its delivery stream.
/// On failure the context is already closed.
async fn open_context<B: PubSubBackend>(
    backend: &B,
) -> Result<(B::Context, Deliveries<B>), BridgeError> {
    let mut ctx = backend.new_subscription_context().await?;
    let checked = match ctx.ping().await {
        Ok(()) => ctx
            .deliveries()
            .ok_or_else(|| BridgeError::Protocol("delivery stream already taken".into())),
        Err(e) => Err(e),
    };
    match checked {
        Ok(deliveries) => Ok((ctx, deliveries)),
        Err(e) => {
            if let Err(close_err) = ctx.close().await {
                debug!("Error closing subscription context: {}", close_err);
            }
            Err(e)
        }
    }
}

fn transition(state: &mut ConnectionState, next: ConnectionState, session_id: u64) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid connection state transition {state} -> {next}"
    );
    debug!("Session {}: {} -> {}", session_id, state, next);
    *state = next;
}

/// Waits for the first shutdown request, turning a server shutdown into one.
async fn coordinate(signal: &ShutdownSignal, server_shutdown: &CancellationToken) -> ShutdownCause {
    tokio::select! {
        biased;
        _ = signal.fired() => {}
        _ = server_shutdown.cancelled() => {
            signal.fire(ShutdownCause::ServerShutdown);
        }
    }
    signal
        .cause()
        .cloned()
        .unwrap_or(ShutdownCause::ServerShutdown)
}

/// Reads frames, parses them and executes the resulting commands.
///
/// The read deadline is extended by every pong; a peer that stops answering
/// pings fails the next read once the deadline passes. Any read failure fires
/// the shutdown signal. Parse and exec failures are logged and skipped.
async fn inbound_loop<R, C, B>(
    reader: &mut R,
    ctx: &mut C,
    backend: &B,
    config: &BridgeConfig,
    signal: &ShutdownSignal,
    session_id: u64,
) where
    R: FrameReader,
    C: SubscriptionContext,
    B: PubSubBackend,
{
    let pong_wait = config.pong_wait;
    reader.set_max_frame_size(config.max_frame_size);
    reader.set_read_deadline(Instant::now() + pong_wait);
    reader.on_pong(Box::new(move || Instant::now() + pong_wait));

    loop {
        if signal.is_fired() {
            return;
        }

        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                match &e {
                    e if e.is_normal_disconnect() => {
                        debug!("Session {}: connection closed by peer.", session_id);
                    }
                    BridgeError::DeadlineExceeded => {
                        info!("Session {}: no pong within {:?}.", session_id, pong_wait);
                    }
                    e => warn!("Session {}: read failed: {}", session_id, e),
                }
                signal.fire(ShutdownCause::ReadFailed(e.to_string()));
                return;
            }
        };

        let command = match Command::parse(&frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("Session {}: {}", session_id, e);
                metrics::COMMAND_ERRORS_TOTAL
                    .with_label_values(&[e.kind().as_ref()])
                    .inc();
                continue;
            }
        };
        debug!("Session {}: received {:?}", session_id, command);
        metrics::COMMANDS_PROCESSED_TOTAL
            .with_label_values(&[command.kind().as_ref()])
            .inc();

        let timer = metrics::COMMAND_LATENCY_SECONDS.start_timer();
        let result = exec(command, ctx, backend).await;
        timer.observe_duration();
        if let Err(e) = result {
            warn!("Session {}: {}", session_id, e);
            metrics::COMMAND_ERRORS_TOTAL
                .with_label_values(&[e.kind().as_ref()])
                .inc();
        }
    }
}

/// Maps a command onto the backend. Publishing needs no subscription, so it
/// goes to the shared backend rather than the connection's context.
async fn exec<C, B>(command: Command, ctx: &mut C, backend: &B) -> Result<(), BridgeError>
where
    C: SubscriptionContext,
    B: PubSubBackend,
{
    match command {
        Command::Publish { channel, payload } => backend.publish(&channel, &payload).await,
        Command::Subscribe(channels) => ctx.subscribe(&channels).await,
        Command::PSubscribe(patterns) => ctx.psubscribe(&patterns).await,
        Command::Unsubscribe(channels) => ctx.unsubscribe(&channels).await,
        Command::PUnsubscribe(patterns) => ctx.punsubscribe(&patterns).await,
    }
}

/// Forwards deliveries to the client and writes a ping every `ping_period`.
///
/// The end of the delivery stream means the backend is gone; that and any
/// write failure fire the shutdown signal.
async fn outbound_loop<W, D>(
    writer: &mut W,
    mut deliveries: D,
    config: &BridgeConfig,
    signal: &ShutdownSignal,
    session_id: u64,
) where
    W: FrameWriter,
    D: Stream<Item = Delivery> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if signal.is_fired() {
            return;
        }

        tokio::select! {
            biased;
            _ = signal.fired() => return,
            delivery = deliveries.next() => {
                let Some(delivery) = delivery else {
                    info!("Session {}: backend delivery stream ended.", session_id);
                    signal.fire(ShutdownCause::BackendDisconnected);
                    return;
                };
                let frame = match delivery.to_wire() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Session {}: dropping delivery for '{}': {}", session_id, delivery.channel, e);
                        continue;
                    }
                };
                writer.set_write_deadline(Instant::now() + config.write_wait);
                if let Err(e) = writer.write_frame(frame).await {
                    warn!("Session {}: write failed: {}", session_id, e);
                    signal.fire(ShutdownCause::WriteFailed(e.to_string()));
                    return;
                }
                metrics::DELIVERIES_FORWARDED_TOTAL.inc();
            }
            _ = ticker.tick() => {
                writer.set_write_deadline(Instant::now() + config.write_wait);
                if let Err(e) = writer.write_ping().await {
                    warn!("Session {}: ping failed: {}", session_id, e);
                    signal.fire(ShutdownCause::WriteFailed(e.to_string()));
                    return;
                }
                metrics::PINGS_SENT_TOTAL.inc();
            }
        }
    }
}
