//! Consistent-hash rings and key placement for DriftKV.
//!
//! The same ring structure is used in two parameterizations:
//! - the **global ring** over cluster node IPs, hashed with CRC-32
//! - the **local ring** over worker identities within one node, hashed
//!   with FNV over `ip:worker_index`
//!
//! The hash function is a capability parameter on the ring type; there is no
//! runtime polymorphism. The [`placement`] oracle answers the
//! "am I responsible?" predicate and names the hand-off peer used during
//! membership changes.

mod hasher;
mod placement;
mod ring;

pub use hasher::{Crc32Hasher, RingHasher, WorkerHasher};
pub use placement::{placement, Placement};
pub use ring::{HashRing, RingMember};

use driftkv_types::{NodeId, WorkerId};

/// The global ring over cluster node IPs.
pub type GlobalRing = HashRing<NodeId, Crc32Hasher>;

/// The local ring over a node's storage workers.
pub type LocalRing = HashRing<WorkerId, WorkerHasher>;

impl RingMember for NodeId {
    fn ring_id(&self) -> String {
        self.ip().to_string()
    }
}

impl RingMember for WorkerId {
    fn ring_id(&self) -> String {
        format!("{}:{}", self.ip(), self.index())
    }
}
