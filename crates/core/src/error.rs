//! Core error types for Replica

use std::net::SocketAddr;

#[derive(thiserror::Error, Debug)]
pub enum ReplicaError {
    /// API used before a session was started or after it was stopped.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: SocketAddr, reason: String },

    /// Malformed, truncated or oversized data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Permission violation, e.g. clearing the RPC buffer of a foreign view.
    #[error("Operation not allowed: {0}")]
    NotAllowed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicaError {
    /// Whether this error, raised while decoding a frame, must tear the
    /// connection down instead of just dropping the offending packet.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ReplicaError::Protocol(_) | ReplicaError::Compression(_) | ReplicaError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
