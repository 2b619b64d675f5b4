//! WebSocket signaling relay for WebRTC
//!
//! This crate brokers session negotiation between a video publisher and a
//! viewer. Peers never talk to each other directly until negotiation is
//! done; until then every offer, answer and ICE candidate passes through the
//! relay, which forwards it verbatim to the counterpart in the same session.
//!
//! # Protocol
//!
//! Clients open a WebSocket on one of two paths:
//!
//! - **`/ingest[/{session}]`** - join as the session's publisher
//! - **`/stream[/{session}]`** - join as the session's viewer
//!
//! Any other upgrade path is refused with `404`. Without a session segment
//! both roles share the default session.
//!
//! ## Messages (client ↔ client, through the relay)
//!
//! One JSON object per text frame:
//! - `{"type": "offer", "sdp": "..."}`
//! - `{"type": "answer", "sdp": "..."}`
//! - `{"type": "candidate", "candidate": {...}}`
//!
//! Other JSON is forwarded as well. Frames that are not JSON are dropped and
//! the connection stays open. Messages sent while the counterpart is absent
//! are dropped, not queued.
//!
//! ## Plain HTTP
//!
//! - **GET /** - liveness probe
//! - **GET /health** - health check
//!
//! CORS is permissive on every route. When a connection limit is set,
//! upgrades beyond it are answered with `503`.
//!
//! # Example
//!
//! ```bash
//! # Start the relay
//! PORT=3001 RUST_LOG=signaling_relay=debug signaling-relay
//!
//! # Publisher and viewer of session "cam1"
//! websocat ws://127.0.0.1:3001/ingest/cam1
//! websocat ws://127.0.0.1:3001/stream/cam1
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod peer;
pub mod registry;
pub mod router;
pub mod server;

pub use config::{RolePolicy, ServerConfig};
pub use error::{ConfigError, ParseError, RegistryError, SignalingError};
pub use message::{InboundMessage, MessageKind, SignalingMessage};
pub use peer::{ConnectionId, PeerHandle, Role, SessionId};
pub use registry::Registry;
pub use router::{RelayOutcome, Router};
pub use server::SignalingServer;
