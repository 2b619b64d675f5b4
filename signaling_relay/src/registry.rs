//! Connection registry
//!
//! Tracks which connection holds the publisher and viewer slot of each
//! session. This is the only shared mutable state in the relay; every read
//! and write goes through one `RwLock`, and no socket I/O happens while it
//! is held.
//!
//! ```text
//!                    Arc<Registry>
//!          ┌──────────────────────────────────┐
//!          │ sessions: HashMap<SessionId,     │
//!          │   SessionSlots {                 │
//!          │     publisher: Option<Handle>,   │
//!          │     viewer:    Option<Handle>,   │
//!          │   }                              │
//!          │ >                                │
//!          └────────────────┬─────────────────┘
//!                           │
//!           ┌───────────────┴───────────────┐
//!           ▼                               ▼
//!   [publisher task]                  [viewer task]
//!   router.relay() ── lookup_peer ──► mailbox ──► socket
//! ```

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::config::RolePolicy;
use crate::error::RegistryError;
use crate::peer::{CloseReason, ConnectionId, PeerHandle, Role, SessionId};

/// Publisher and viewer slot of one session
#[derive(Debug, Default)]
struct SessionSlots {
    publisher: Option<PeerHandle>,
    viewer: Option<PeerHandle>,
}

impl SessionSlots {
    fn slot(&self, role: Role) -> Option<&PeerHandle> {
        match role {
            Role::Publisher => self.publisher.as_ref(),
            Role::Viewer => self.viewer.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<PeerHandle> {
        match role {
            Role::Publisher => &mut self.publisher,
            Role::Viewer => &mut self.viewer,
        }
    }

    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.viewer.is_none()
    }

    fn holds(&self, peer: &PeerHandle) -> bool {
        self.slot(peer.role())
            .is_some_and(|current| current.id() == peer.id())
    }
}

/// Result of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Connection that was force-closed to make room, if any
    pub evicted: Option<ConnectionId>,
}

/// Snapshot of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub has_publisher: bool,
    pub has_viewer: bool,
}

/// Registry of live connections, keyed by session and role
#[derive(Debug)]
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, SessionSlots>>,
    policy: RolePolicy,
}

impl Registry {
    /// Create a registry with the default (replace) policy
    pub fn new() -> Self {
        Self::with_policy(RolePolicy::default())
    }

    pub fn with_policy(policy: RolePolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> RolePolicy {
        self.policy
    }

    /// Put a connection in its role slot
    ///
    /// Under [`RolePolicy::Replace`] a previous holder is force-closed before
    /// this returns. Under [`RolePolicy::Reject`] an occupied slot yields
    /// [`RegistryError::RoleConflict`] and nothing changes.
    pub async fn register(&self, peer: PeerHandle) -> Result<Registration, RegistryError> {
        let mut sessions = self.sessions.write().await;
        let slots = sessions.entry(peer.session().clone()).or_default();
        let slot = slots.slot_mut(peer.role());

        if let Some(current) = slot.as_ref() {
            if current.id() == peer.id() {
                return Ok(Registration { evicted: None });
            }
            if self.policy == RolePolicy::Reject && current.is_open() {
                return Err(RegistryError::RoleConflict {
                    session: peer.session().clone(),
                    role: peer.role(),
                });
            }
        }

        let connection = peer.id();
        let role = peer.role();
        let session = peer.session().clone();

        let evicted = slot.replace(peer).map(|previous| {
            previous.close(CloseReason::Replaced);
            previous.id()
        });

        match evicted {
            Some(previous) => tracing::info!(
                connection = %connection,
                evicted = %previous,
                session = %session,
                role = %role,
                "Connection registered, previous holder evicted"
            ),
            None => tracing::info!(
                connection = %connection,
                session = %session,
                role = %role,
                "Connection registered"
            ),
        }

        Ok(Registration { evicted })
    }

    /// Remove a connection from its slot
    ///
    /// No-op if the slot is empty or held by another connection. Returns
    /// whether anything was removed.
    pub async fn unregister(&self, peer: &PeerHandle) -> bool {
        let mut sessions = self.sessions.write().await;

        let Some(slots) = sessions.get_mut(peer.session()) else {
            return false;
        };
        if !slots.holds(peer) {
            return false;
        }

        slots.slot_mut(peer.role()).take();
        if slots.is_empty() {
            sessions.remove(peer.session());
        }

        tracing::info!(
            connection = %peer.id(),
            session = %peer.session(),
            role = %peer.role(),
            "Connection unregistered"
        );
        true
    }

    /// Find the open counterpart of a connection
    ///
    /// Returns `None` if the connection no longer holds its own slot, if the
    /// opposite slot is empty, or if its holder is closed.
    pub async fn lookup_peer(&self, peer: &PeerHandle) -> Option<PeerHandle> {
        let sessions = self.sessions.read().await;
        let slots = sessions.get(peer.session())?;

        if !slots.holds(peer) {
            return None;
        }

        slots
            .slot(peer.role().counterpart())
            .filter(|counterpart| counterpart.is_open())
            .cloned()
    }

    /// Whether this exact connection is registered
    pub async fn contains(&self, peer: &PeerHandle) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(peer.session())
            .is_some_and(|slots| slots.holds(peer))
    }

    pub async fn session_stats(&self, session: &SessionId) -> Option<SessionStats> {
        let sessions = self.sessions.read().await;
        sessions.get(session).map(|slots| SessionStats {
            has_publisher: slots.publisher.is_some(),
            has_viewer: slots.viewer.is_some(),
        })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|slots| usize::from(slots.publisher.is_some()) + usize::from(slots.viewer.is_some()))
            .sum()
    }

    /// Force-close every registered connection
    ///
    /// The slots are cleared as each connection task unregisters itself.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let sessions = self.sessions.read().await;
        let mut closed = 0;

        for slots in sessions.values() {
            for peer in [&slots.publisher, &slots.viewer].into_iter().flatten() {
                if peer.close(reason) {
                    closed += 1;
                }
            }
        }

        tracing::debug!(closed = closed, reason = ?reason, "Closed all connections");
        closed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::peer::{MailboxEvent, PeerMailbox};

    use super::*;

    fn peer(role: Role, session: &str) -> (PeerHandle, PeerMailbox) {
        PeerHandle::channel(ConnectionId::new(), role, SessionId::new(session), 8)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = Registry::new();
        let (publisher, _pm) = peer(Role::Publisher, "");
        let (viewer, _vm) = peer(Role::Viewer, "");

        registry.register(publisher.clone()).await.unwrap();
        assert!(registry.lookup_peer(&publisher).await.is_none());

        registry.register(viewer.clone()).await.unwrap();

        let found = registry.lookup_peer(&publisher).await.unwrap();
        assert_eq!(found.id(), viewer.id());
        let found = registry.lookup_peer(&viewer).await.unwrap();
        assert_eq!(found.id(), publisher.id());

        assert_eq!(registry.connection_count().await, 2);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_replace_evicts_previous_holder() {
        let registry = Registry::new();
        let (first, mut first_mailbox) = peer(Role::Publisher, "");
        let (second, _sm) = peer(Role::Publisher, "");
        let (viewer, _vm) = peer(Role::Viewer, "");

        registry.register(first.clone()).await.unwrap();
        registry.register(viewer.clone()).await.unwrap();

        let registration = registry.register(second.clone()).await.unwrap();

        // Closed before register returned
        assert_eq!(registration.evicted, Some(first.id()));
        assert!(!first.is_open());
        assert_eq!(
            first_mailbox.recv().await,
            MailboxEvent::Closed(CloseReason::Replaced)
        );

        // The evicted connection can no longer reach the viewer
        assert!(registry.lookup_peer(&first).await.is_none());
        let found = registry.lookup_peer(&viewer).await.unwrap();
        assert_eq!(found.id(), second.id());
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let registry = Registry::with_policy(RolePolicy::Reject);
        let (first, _fm) = peer(Role::Viewer, "room");
        let (second, _sm) = peer(Role::Viewer, "room");

        registry.register(first.clone()).await.unwrap();
        let result = registry.register(second.clone()).await;

        assert_eq!(
            result,
            Err(RegistryError::RoleConflict {
                session: SessionId::new("room"),
                role: Role::Viewer,
            })
        );
        assert!(first.is_open());
        assert!(registry.contains(&first).await);
        assert!(!registry.contains(&second).await);
    }

    #[tokio::test]
    async fn test_reject_policy_allows_replacing_closed_holder() {
        let registry = Registry::with_policy(RolePolicy::Reject);
        let (first, first_mailbox) = peer(Role::Publisher, "");
        let (second, _sm) = peer(Role::Publisher, "");

        registry.register(first.clone()).await.unwrap();
        drop(first_mailbox);

        let registration = registry.register(second.clone()).await.unwrap();
        assert_eq!(registration.evicted, Some(first.id()));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let (publisher, _pm) = peer(Role::Publisher, "");

        registry.register(publisher.clone()).await.unwrap();

        assert!(registry.unregister(&publisher).await);
        assert!(!registry.unregister(&publisher).await);
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_replacement() {
        let registry = Registry::new();
        let (first, _fm) = peer(Role::Publisher, "");
        let (second, _sm) = peer(Role::Publisher, "");

        registry.register(first.clone()).await.unwrap();
        registry.register(second.clone()).await.unwrap();

        // The evicted task cleans up after the replacement registered
        assert!(!registry.unregister(&first).await);
        assert!(registry.contains(&second).await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = Registry::new();
        let (publisher_a, _a) = peer(Role::Publisher, "a");
        let (viewer_b, _b) = peer(Role::Viewer, "b");

        registry.register(publisher_a.clone()).await.unwrap();
        registry.register(viewer_b.clone()).await.unwrap();

        assert!(registry.lookup_peer(&publisher_a).await.is_none());
        assert!(registry.lookup_peer(&viewer_b).await.is_none());
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_closed_peer_not_returned() {
        let registry = Registry::new();
        let (publisher, _pm) = peer(Role::Publisher, "");
        let (viewer, viewer_mailbox) = peer(Role::Viewer, "");

        registry.register(publisher.clone()).await.unwrap();
        registry.register(viewer.clone()).await.unwrap();
        drop(viewer_mailbox);

        assert!(registry.lookup_peer(&publisher).await.is_none());
    }

    #[tokio::test]
    async fn test_session_stats() {
        let registry = Registry::new();
        let (viewer, _vm) = peer(Role::Viewer, "room");

        assert!(registry.session_stats(&SessionId::new("room")).await.is_none());

        registry.register(viewer).await.unwrap();
        let stats = registry
            .session_stats(&SessionId::new("room"))
            .await
            .unwrap();
        assert!(!stats.has_publisher);
        assert!(stats.has_viewer);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = Registry::new();
        let (publisher, _pm) = peer(Role::Publisher, "a");
        let (viewer, _vm) = peer(Role::Viewer, "b");

        registry.register(publisher.clone()).await.unwrap();
        registry.register(viewer.clone()).await.unwrap();

        assert_eq!(registry.close_all(CloseReason::Shutdown).await, 2);
        assert_eq!(publisher.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(viewer.close_reason(), Some(CloseReason::Shutdown));
    }
}
