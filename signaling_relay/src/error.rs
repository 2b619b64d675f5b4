//! Error types for the signaling relay

use thiserror::Error;

use crate::lifecycle::ConnectionState;
use crate::peer::{ConnectionId, Role, SessionId};

/// Process-level errors: the only ones allowed to stop the server
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Socket or listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from classifying an inbound frame
///
/// Neither variant closes the connection; the frame is dropped.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Frame could not be decoded to text
    #[error("Unsupported encoding")]
    UnsupportedEncoding,

    /// Text was not valid JSON
    #[error("JSON error: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors from registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The role slot is already occupied and the policy refuses replacement
    #[error("Role {role} already taken in session {session}")]
    RoleConflict { session: SessionId, role: Role },

    /// Registration attempted after the connection left `Connecting`
    #[error("Connection {connection} cannot be assigned in state {state:?}")]
    InvalidState {
        connection: ConnectionId,
        state: ConnectionState,
    },
}

/// Errors from loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// A role policy name other than `replace` or `reject`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role policy {0:?}, expected \"replace\" or \"reject\"")]
pub struct UnknownPolicyError(pub String);
