//! Identifier types for cluster nodes and storage workers.
//!
//! A node is identified by its IP; a worker by its node's IP plus a worker
//! index. Both derive a fixed family of endpoint addresses from their
//! identity, so placement decisions can travel as plain address strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base port for worker client endpoints; worker `i` replies to clients on
/// `SERVER_PORT + i`.
pub const SERVER_PORT: u16 = 6560;

/// Offset of the distributed-gossip port family above the client ports.
pub const GOSSIP_PORT_OFFSET: u16 = 100;

/// Coordinator seed-address reply endpoint.
pub const SEED_PORT: u16 = 6400;
/// Coordinator node-join pull endpoint.
pub const NODE_JOIN_PORT: u16 = 6401;
/// Coordinator node-departure pull endpoint.
pub const NODE_DEPART_PORT: u16 = 6402;
/// Coordinator key-exchange reply endpoint.
pub const KEY_EXCHANGE_PORT: u16 = 6403;
/// Coordinator changeset-address reply endpoint.
pub const CHANGESET_PORT: u16 = 6404;
/// Coordinator depart-done pull endpoint.
pub const DEPART_DONE_PORT: u16 = 6405;
/// Coordinator self-depart pull endpoint.
pub const SELF_DEPART_PORT: u16 = 6406;
/// Port a client host listens on for join/depart notifications.
pub const CLIENT_NOTIFY_PORT: u16 = 6410;

/// Identity of a cluster member node.
///
/// Nodes are identified by IP alone; all coordinator endpoints hang off
/// well-known ports on that IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId {
    ip: String,
}

impl NodeId {
    /// Creates a node identity from its IP.
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into() }
    }

    /// Returns the node's IP.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Seed-address reply endpoint: a new node asks here for the member list.
    #[must_use]
    pub fn seed_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, SEED_PORT)
    }

    /// Node-join pull endpoint.
    #[must_use]
    pub fn node_join_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, NODE_JOIN_PORT)
    }

    /// Node-departure pull endpoint.
    #[must_use]
    pub fn node_depart_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, NODE_DEPART_PORT)
    }

    /// Key-exchange reply endpoint.
    #[must_use]
    pub fn key_exchange_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, KEY_EXCHANGE_PORT)
    }

    /// Changeset-address reply endpoint.
    #[must_use]
    pub fn changeset_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, CHANGESET_PORT)
    }

    /// Depart-done pull endpoint.
    #[must_use]
    pub fn depart_done_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, DEPART_DONE_PORT)
    }

    /// Self-depart pull endpoint.
    #[must_use]
    pub fn self_depart_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, SELF_DEPART_PORT)
    }

    /// Join/depart notification endpoint on a client host.
    #[must_use]
    pub fn client_notify_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, CLIENT_NOTIFY_PORT)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}

/// Identity of a storage worker within a node.
///
/// The canonical string form is `<ip>:<SERVER_PORT + index>` — the worker's
/// client address — which is what placement queries hand out and what
/// [`WorkerId::from_address`] parses back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    ip: String,
    index: usize,
}

impl WorkerId {
    /// Creates a worker identity from its node IP and worker index.
    #[must_use]
    pub fn new(ip: impl Into<String>, index: usize) -> Self {
        Self {
            ip: ip.into(),
            index,
        }
    }

    /// Parses the canonical `<ip>:<port>` form back into an identity.
    pub fn from_address(addr: &str) -> crate::Result<Self> {
        let (ip, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| crate::Error::InvalidWorkerAddress(addr.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| crate::Error::InvalidWorkerAddress(addr.to_string()))?;
        if port < SERVER_PORT {
            return Err(crate::Error::InvalidWorkerAddress(addr.to_string()));
        }
        Ok(Self {
            ip: ip.to_string(),
            index: (port - SERVER_PORT) as usize,
        })
    }

    /// Returns the node IP this worker runs on.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Returns the worker index within its node.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Canonical string identity, `<ip>:<client port>`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.ip, SERVER_PORT + self.index as u16)
    }

    /// Client request/reply endpoint.
    #[must_use]
    pub fn client_addr(&self) -> String {
        format!("tcp://{}:{}", self.ip, SERVER_PORT + self.index as u16)
    }

    /// Distributed-gossip pull endpoint.
    #[must_use]
    pub fn gossip_addr(&self) -> String {
        format!(
            "tcp://{}:{}",
            self.ip,
            SERVER_PORT + GOSSIP_PORT_OFFSET + self.index as u16
        )
    }

    /// Local-gossip in-process pull endpoint.
    #[must_use]
    pub fn local_gossip_addr(&self) -> String {
        format!("inproc://{}:{}/lgossip", self.ip, self.index)
    }

    /// Local-redistribute in-process pull endpoint.
    #[must_use]
    pub fn redistribute_addr(&self) -> String {
        format!("inproc://{}:{}/lredist", self.ip, self.index)
    }

    /// Local-depart in-process pull endpoint.
    #[must_use]
    pub fn depart_addr(&self) -> String {
        format!("inproc://{}:{}/ldepart", self.ip, self.index)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for WorkerId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_address(s)
    }
}
