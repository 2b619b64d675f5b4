//! Peer identity and connection handles
//!
//! A [`PeerHandle`] is the cheap, cloneable reference to a live connection
//! that the registry and router hold. The socket itself stays with the
//! connection task, which drains the matching [`PeerMailbox`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use axum::extract::ws::{CloseFrame, Utf8Bytes, close_code};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Uuid::new_v4().into()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session identifier
///
/// The empty id is the default session used by bare `/ingest` and `/stream`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Role a connection plays within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Publisher,
    Viewer,
}

impl Role {
    /// The role messages from this one are relayed to
    pub fn counterpart(self) -> Role {
        match self {
            Role::Publisher => Role::Viewer,
            Role::Viewer => Role::Publisher,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection was closed from the relay side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Another connection took over the role slot
    Replaced,
    /// The role slot was taken and the policy refused the newcomer
    Rejected,
    /// Nothing was received within the idle timeout
    Idle,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    /// Close frame sent to the client
    pub fn close_frame(self) -> CloseFrame {
        let (code, reason) = match self {
            CloseReason::Replaced => (close_code::POLICY, "replaced by a newer connection"),
            CloseReason::Rejected => (close_code::POLICY, "role already taken"),
            CloseReason::Idle => (close_code::AWAY, "idle timeout"),
            CloseReason::Shutdown => (close_code::AWAY, "server shutting down"),
        };
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }
}

/// Outcome of handing a payload to a peer's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Queued,
    /// Queue full; payload dropped
    Full,
    /// Channel already closed
    Closed,
}

#[derive(Debug, Default)]
struct ChannelState {
    /// Set exactly once, by whoever closes first
    reason: OnceLock<CloseReason>,
    closed: Notify,
}

/// Cloneable reference to a live connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    role: Role,
    session: SessionId,
    outbound: mpsc::Sender<Utf8Bytes>,
    state: Arc<ChannelState>,
}

impl PeerHandle {
    /// Create a handle and the mailbox its connection task drains
    ///
    /// `capacity` bounds the outbound queue; zero is treated as one.
    pub fn channel(
        id: ConnectionId,
        role: Role,
        session: SessionId,
        capacity: usize,
    ) -> (PeerHandle, PeerMailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let state = Arc::new(ChannelState::default());
        let handle = PeerHandle {
            id,
            role,
            session,
            outbound: tx,
            state: Arc::clone(&state),
        };
        let mailbox = PeerMailbox {
            outbound: rx,
            state,
        };
        (handle, mailbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Whether the channel still accepts payloads
    pub fn is_open(&self) -> bool {
        self.state.reason.get().is_none() && !self.outbound.is_closed()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason.get().copied()
    }

    /// Queue a payload without waiting
    pub fn try_send(&self, payload: Utf8Bytes) -> SendStatus {
        if !self.is_open() {
            return SendStatus::Closed;
        }
        match self.outbound.try_send(payload) {
            Ok(()) => SendStatus::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendStatus::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }

    /// Force-close the channel
    ///
    /// Takes effect immediately for [`is_open`](Self::is_open); the owning
    /// task is woken, abandoning any write in progress, to send the close
    /// frame. Returns `false` if the channel was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = self.state.reason.set(reason).is_ok();
        if first {
            self.state.closed.notify_waiters();
        }
        first
    }
}

/// What the connection task should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxEvent {
    /// Write this payload to the socket
    Payload(Utf8Bytes),
    /// The handle was closed; send a close frame and stop
    Closed(CloseReason),
}

/// Receiving half of a [`PeerHandle`], owned by the connection task
#[derive(Debug)]
pub struct PeerMailbox {
    outbound: mpsc::Receiver<Utf8Bytes>,
    state: Arc<ChannelState>,
}

impl PeerMailbox {
    /// Wait for the next payload or for the handle to be closed
    ///
    /// A close always wins over queued payloads.
    pub async fn recv(&mut self) -> MailboxEvent {
        // Registered before the check so a concurrent close cannot be missed
        let closed = self.state.closed.notified();
        if let Some(reason) = self.state.reason.get() {
            return MailboxEvent::Closed(*reason);
        }

        tokio::select! {
            biased;
            _ = closed => {
                MailboxEvent::Closed(self.state.reason.get().copied().unwrap_or(CloseReason::Shutdown))
            }
            payload = self.outbound.recv() => match payload {
                Some(payload) => MailboxEvent::Payload(payload),
                None => MailboxEvent::Closed(CloseReason::Shutdown),
            },
        }
    }

    /// Wait until the handle is closed
    pub async fn closed(&self) -> CloseReason {
        loop {
            let notified = self.state.closed.notified();
            if let Some(reason) = self.state.reason.get() {
                return *reason;
            }
            notified.await;
        }
    }

    /// Take a queued payload if one is ready
    pub fn try_recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.try_recv().ok()
    }
}
