//! Connection lifecycle
//!
//! Each upgraded WebSocket is served by its own task, which reads the socket,
//! drives the per-connection state machine and is the only place that
//! registers or unregisters the connection. A companion writer task drains
//! the connection's mailbox into the socket.
//!
//! ```text
//! Connecting ──► Publisher ─┐
//!     │     └──► Viewer ────┼──► Closed
//!     └────────► Rejected ──┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::error::{ParseError, RegistryError};
use crate::handler::Route;
use crate::message::InboundMessage;
use crate::peer::{CloseReason, ConnectionId, MailboxEvent, PeerHandle, PeerMailbox, Role};
use crate::registry::{Registration, Registry};
use crate::router::Router;

/// How long a close frame may take to reach a client
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, role not yet assigned
    Connecting,
    /// Registered as the session's publisher
    Publisher,
    /// Registered as the session's viewer
    Viewer,
    /// Refused a role; never registered
    Rejected,
    /// Terminal
    Closed,
}

/// State machine for one connection
///
/// Keeps the registry consistent with the connection's state: a connection
/// is registered exactly while it is `Publisher` or `Viewer`.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    handle: Option<PeerHandle>,
    registry: Arc<Registry>,
}

impl Lifecycle {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            state: ConnectionState::Connecting,
            handle: None,
            registry,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Register the connection in its role slot
    ///
    /// Only valid while `Connecting`; moves to `Publisher`/`Viewer`, or to
    /// `Rejected` if the registry refuses.
    pub async fn assign(&mut self, handle: PeerHandle) -> Result<Registration, RegistryError> {
        if self.state != ConnectionState::Connecting {
            return Err(RegistryError::InvalidState {
                connection: handle.id(),
                state: self.state,
            });
        }

        match self.registry.register(handle.clone()).await {
            Ok(registration) => {
                self.state = match handle.role() {
                    Role::Publisher => ConnectionState::Publisher,
                    Role::Viewer => ConnectionState::Viewer,
                };
                self.handle = Some(handle);
                Ok(registration)
            }
            Err(e) => {
                self.state = ConnectionState::Rejected;
                Err(e)
            }
        }
    }

    /// Move to `Closed`, unregistering if needed
    ///
    /// Idempotent: only the first call has any effect. Returns whether this
    /// call performed the transition.
    pub async fn disconnect(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        if let Some(handle) = self.handle.take() {
            self.registry.unregister(&handle).await;
        }
        self.state = ConnectionState::Closed;
        true
    }
}

/// Everything a connection needs from the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub router: Router,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl ConnectionContext {
    pub fn new(config: Arc<ServerConfig>, registry: Arc<Registry>) -> Self {
        let router = Router::new(Arc::clone(&registry));
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry,
            router,
            connection_semaphore,
        }
    }

    /// Reserve a connection slot; `Ok(None)` when unlimited
    pub fn try_acquire(&self) -> Result<Option<OwnedSemaphorePermit>, TryAcquireError> {
        match &self.connection_semaphore {
            Some(sem) => Arc::clone(sem).try_acquire_owned().map(Some),
            None => Ok(None),
        }
    }
}

/// Drive an upgraded connection until it closes
///
/// The read side runs here; writes go through a separate task so that a
/// client that stops reading never blocks inbound traffic or a force-close.
pub async fn serve_websocket(
    socket: WebSocket,
    peer_addr: SocketAddr,
    route: Route,
    ctx: ConnectionContext,
) {
    let mut lifecycle = Lifecycle::new(Arc::clone(&ctx.registry));

    let connection_id = ConnectionId::new();
    let (handle, mailbox) = PeerHandle::channel(
        connection_id,
        route.role,
        route.session.clone(),
        ctx.config.outbound_buffer,
    );
    let (mut sink, mut stream) = socket.split();

    tracing::debug!(
        connection = %connection_id,
        peer = %peer_addr,
        role = %route.role,
        session = %route.session,
        "WebSocket connection accepted"
    );

    if let Err(e) = lifecycle.assign(handle.clone()).await {
        tracing::warn!(connection = %connection_id, error = %e, "Connection rejected");
        let frame = CloseReason::Rejected.close_frame();
        let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(Some(frame)))).await;
        lifecycle.disconnect().await;
        return;
    }

    let mut writer = tokio::spawn(write_loop(
        sink,
        mailbox,
        ticker(ctx.config.ping_interval),
        connection_id,
    ));
    let mut idle = ticker(ctx.config.idle_timeout);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                // Keep reading so the close reply is flushed; the stream ends after it
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!(connection = %connection_id, "Client closed connection");
                }
                Some(Ok(frame)) => {
                    last_seen = Instant::now();
                    if matches!(frame, Message::Text(_) | Message::Binary(_)) {
                        handle_frame(&ctx.router, &handle, frame).await;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(connection = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = &mut writer => break,
            _ = tick(&mut idle) => {
                if let Some(timeout) = ctx.config.idle_timeout {
                    if last_seen.elapsed() >= timeout {
                        handle.close(CloseReason::Idle);
                    }
                }
            }
        }
    }

    writer.abort();
    lifecycle.disconnect().await;
    tracing::info!(
        connection = %connection_id,
        role = %route.role,
        session = %route.session,
        "Connection closed"
    );
}

/// Drain the mailbox into the socket
///
/// A write in progress is abandoned as soon as the handle is closed; the
/// close frame then gets [`CLOSE_GRACE`] to go out.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: PeerMailbox,
    mut ping: Option<Interval>,
    connection_id: ConnectionId,
) {
    loop {
        let message = tokio::select! {
            event = mailbox.recv() => match event {
                MailboxEvent::Payload(payload) => Message::Text(payload),
                MailboxEvent::Closed(reason) => {
                    tracing::info!(connection = %connection_id, reason = ?reason, "Closing connection");
                    let frame = Message::Close(Some(reason.close_frame()));
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(frame)).await;
                    return;
                }
            },
            _ = tick(&mut ping) => Message::Ping(Default::default()),
        };

        tokio::select! {
            result = sink.send(message) => {
                if let Err(e) = result {
                    tracing::debug!(connection = %connection_id, error = %e, "Send failed");
                    return;
                }
            }
            reason = mailbox.closed() => {
                tracing::debug!(connection = %connection_id, reason = ?reason, "Abandoning pending write");
            }
        }
    }
}

async fn handle_frame(router: &Router, handle: &PeerHandle, frame: Message) {
    match InboundMessage::parse(frame) {
        Ok(message) => {
            router.relay(handle, &message).await;
        }
        Err(ParseError::UnsupportedEncoding) => {
            tracing::debug!(connection = %handle.id(), "Ignoring non-text message");
        }
        Err(e) => {
            tracing::warn!(connection = %handle.id(), error = %e, "Error parsing JSON message, ignoring");
        }
    }
}

/// Periodic ticker, if `period` is set
fn ticker(period: Option<Duration>) -> Option<Interval> {
    let period = period?.max(Duration::from_millis(10));

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
