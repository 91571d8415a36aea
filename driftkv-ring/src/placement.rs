//! The placement oracle: responsibility and hand-off for one key.

use crate::hasher::RingHasher;
use crate::ring::{HashRing, RingMember};

/// The oracle's answer for one key on one ring snapshot.
#[derive(Debug, Clone)]
pub struct Placement<N> {
    /// Whether `self_id` is among the key's first `rep` successors.
    pub is_responsible: bool,
    /// Whether the caller must drop its copy after handing the key off.
    pub remove_on_handoff: bool,
    /// The unique peer involved in the hand-off, when responsible:
    /// the member entering (or taking over) the replica set if the ring has
    /// grown past `rep`, otherwise the next replica the key must still be
    /// mirrored to.
    pub handoff_peer: Option<N>,
}

/// Computes responsibility and the hand-off peer for `key` under a
/// replication factor of `rep`.
///
/// Pure over a snapshot of the ring; callers must not mutate the ring while
/// a batch of placement computations is in flight.
#[must_use]
pub fn placement<N: RingMember, H: RingHasher>(
    ring: &HashRing<N, H>,
    key: &str,
    rep: usize,
    self_id: &str,
) -> Placement<N> {
    let replicas = ring.successors(key, rep);
    let position = replicas.iter().position(|m| m.ring_id() == self_id);

    let Some(position) = position else {
        return Placement {
            is_responsible: false,
            remove_on_handoff: false,
            handoff_peer: None,
        };
    };

    if ring.len() > rep {
        // The ring outgrew the replica set: the (rep+1)-th successor is the
        // member that rotates in, and the caller migrates there before
        // dropping the key.
        let peer = ring
            .successors(key, rep + 1)
            .last()
            .map(|member| (*member).clone());
        Placement {
            is_responsible: true,
            remove_on_handoff: true,
            handoff_peer: peer,
        }
    } else {
        // Every member replicates the key; it still flows to the next
        // replica but is never dropped locally.
        let peer = (*replicas[(position + 1) % replicas.len()]).clone();
        Placement {
            is_responsible: true,
            remove_on_handoff: false,
            handoff_peer: Some(peer),
        }
    }
}
