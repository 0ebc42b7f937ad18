//! Error types for the swarm environment abstraction.

use crate::types::ObjectId;
use thiserror::Error;

/// Errors raised by external collaborators (physics world, network bridge).
#[derive(Debug, Error)]
pub enum EnvError {
    /// Network exchange failed (backend rejected the request, bad topology, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The bridge worker went away before answering
    #[error("Bridge channel closed")]
    ChannelClosed,

    /// The physics world has no body with this id
    #[error("Unknown physical object: {0}")]
    UnknownObject(ObjectId),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }
}
