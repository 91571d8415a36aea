//! Error types for the node layer.

use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport error (unknown address, endpoint type mismatch, peer gone).
    #[error("transport error: {0}")]
    Transport(String),

    /// A request/reply channel closed before the reply arrived.
    #[error("channel closed")]
    ChannelClosed,

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] driftkv_store::StoreError),

    /// Configuration error; fatal at startup.
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Malformed identifier.
    #[error(transparent)]
    Identifier(#[from] driftkv_types::Error),

    /// The two-letter device namespace is exhausted.
    #[error("device namespace exhausted")]
    DeviceSpaceExhausted,

    /// Volume attach/detach side effect failed.
    #[error("volume error: {0}")]
    Volume(String),
}
