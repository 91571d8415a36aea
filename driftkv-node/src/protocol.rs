//! Wire messages and in-process command shapes.
//!
//! The serialized messages (`ClientRequest`, `ClientResponse`, `Gossip`,
//! `KeyRequest`, `KeyResponse`) cross node boundaries; everything else is an
//! in-process shape whose ownership transfers at channel send, never
//! serialized.

use driftkv_lattice::LwwRegister;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A client request to one storage worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Read a key's value.
    Get { key: String },
    /// Write a value; the worker assigns the timestamp.
    Put { key: String, value: Vec<u8> },
}

/// Reply to a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub succeed: bool,
    pub value: Vec<u8>,
}

impl ClientResponse {
    /// A successful reply carrying a value (empty for PUT).
    #[must_use]
    pub fn ok(value: Vec<u8>) -> Self {
        Self {
            succeed: true,
            value,
        }
    }

    /// A failed reply; the value is always empty.
    #[must_use]
    pub fn fail() -> Self {
        Self {
            succeed: false,
            value: Vec::new(),
        }
    }
}

/// One record in a distributed-gossip batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipTuple {
    pub key: String,
    pub timestamp: u64,
    pub value: Vec<u8>,
}

/// A batch of records pushed between remote replicas for anti-entropy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gossip {
    pub tuples: Vec<GossipTuple>,
}

/// A key-address query: which workers serve these keys?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub sender: String,
    pub keys: Vec<String>,
}

/// Worker addresses for one queried key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAddresses {
    pub key: String,
    pub addresses: Vec<String>,
}

/// Reply to a [`KeyRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyResponse {
    pub tuples: Vec<KeyAddresses>,
}

/// An owned batch of records handed to a local replica over an in-process
/// channel. The receiver consumes it; nothing is serialized.
pub type GossipBatch = HashMap<String, LwwRegister>;

/// Gossip destinations resolved by the coordinator: worker address → keys.
pub type ChangesetAddresses = HashMap<String, HashSet<String>>;

/// A redistribute command: destination worker address → the keys to send
/// there, each with its remove flag.
pub type RedistributePlan = HashMap<String, HashSet<(String, bool)>>;

/// A worker's request to resolve its changeset into gossip destinations.
#[derive(Debug, Clone)]
pub struct ChangesetRequest {
    /// The requesting worker's client port; identifies it on the local ring.
    pub origin_port: u16,
    /// The keys mutated since the last flush.
    pub keys: HashSet<String>,
    /// When set, only local-ring destinations are resolved (depart drain).
    pub local_only: bool,
}
