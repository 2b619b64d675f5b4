//! Relay routing
//!
//! Forwards a sender's payload to the counterpart in its session. The
//! payload is never re-serialized.

use std::sync::Arc;

use crate::message::InboundMessage;
use crate::peer::{PeerHandle, SendStatus};
use crate::registry::Registry;

/// Result of relaying one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued for the counterpart
    Delivered,
    /// No open counterpart; message dropped
    NoPeer,
    /// Counterpart's outbound queue was full; message dropped
    Dropped,
}

/// Routes messages between session counterparts
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forward `message` from `from` to its counterpart
    ///
    /// Never waits on the counterpart's socket: the payload is queued, or
    /// dropped if the queue is full.
    pub async fn relay(&self, from: &PeerHandle, message: &InboundMessage) -> RelayOutcome {
        let message_type = message.type_name().unwrap_or("<none>");

        let Some(peer) = self.registry.lookup_peer(from).await else {
            tracing::debug!(
                connection = %from.id(),
                session = %from.session(),
                message_type = message_type,
                "No peer available to relay message"
            );
            return RelayOutcome::NoPeer;
        };

        match peer.try_send(message.payload().clone()) {
            SendStatus::Queued => {
                tracing::debug!(
                    from = %from.role(),
                    to = %peer.role(),
                    session = %from.session(),
                    message_type = message_type,
                    "Relaying message"
                );
                RelayOutcome::Delivered
            }
            SendStatus::Full => {
                tracing::warn!(
                    connection = %peer.id(),
                    session = %from.session(),
                    message_type = message_type,
                    "Peer outbound queue full, dropping message"
                );
                RelayOutcome::Dropped
            }
            SendStatus::Closed => {
                tracing::debug!(
                    connection = %peer.id(),
                    session = %from.session(),
                    message_type = message_type,
                    "Peer closed before relay"
                );
                RelayOutcome::NoPeer
            }
        }
    }
}
