//! Error types for the chat hub.

use thiserror::Error;

/// Errors that can occur in real-time chat operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The registry refused a new connection.
    #[error("connection limit reached: max {0} connections per shard")]
    ConnectionLimit(usize),

    /// The registry event loop is no longer running.
    #[error("registry closed")]
    RegistryClosed,

    /// Inbound envelope is missing a required field.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Persistence collaborator failed.
    #[error("store error: {0}")]
    Store(String),

    /// Push notification collaborator failed.
    #[error("notification error: {0}")]
    Notify(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket write or read failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Socket write did not complete before its deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
