//! Core type definitions for DriftKV.
//!
//! This crate defines the fundamental, transport-agnostic types used
//! throughout the store:
//! - Node and worker identifiers with their derived endpoint families
//! - The process-wide last-writer-wins timestamp clock
//!
//! Wire message shapes and placement logic live in their own crates, not
//! here.

mod clock;
mod ids;

pub use clock::LwwClock;
pub use ids::{
    NodeId, WorkerId, CHANGESET_PORT, CLIENT_NOTIFY_PORT, DEPART_DONE_PORT, GOSSIP_PORT_OFFSET,
    KEY_EXCHANGE_PORT, NODE_DEPART_PORT, NODE_JOIN_PORT, SEED_PORT, SELF_DEPART_PORT, SERVER_PORT,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid worker address: {0}")]
    InvalidWorkerAddress(String),
}
