//! The consistent-hash ring data structure.

use crate::hasher::RingHasher;
use std::collections::BTreeMap;
use tracing::debug;

/// A member that can be placed on a ring.
///
/// `ring_id` is the identifier that gets hashed to a position; equal
/// positions tie-break by ascending `ring_id`.
pub trait RingMember: Clone {
    /// The identifier hashed to place this member on the ring.
    fn ring_id(&self) -> String;
}

/// A position on the ring: the member's hash, then its id for tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Position {
    hash: u64,
    id: String,
}

/// An ordered ring of members keyed by the hash of their identifiers.
///
/// There are no virtual nodes: each member occupies exactly one position,
/// which keeps successor traversal and replica-set reasoning simple.
#[derive(Debug, Clone)]
pub struct HashRing<N, H> {
    ring: BTreeMap<Position, N>,
    hasher: H,
}

impl<N: RingMember, H: RingHasher> Default for HashRing<N, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: RingMember, H: RingHasher> HashRing<N, H> {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: BTreeMap::new(),
            hasher: H::default(),
        }
    }

    fn position_of(&self, id: &str) -> Position {
        Position {
            hash: self.hasher.position(id),
            id: id.to_string(),
        }
    }

    /// Inserts a member. Inserting an existing member is a no-op.
    pub fn insert(&mut self, member: N) {
        let pos = self.position_of(&member.ring_id());
        if self.ring.contains_key(&pos) {
            return;
        }
        debug!(member = %pos.id, hash = pos.hash, "ring insert");
        self.ring.insert(pos, member);
    }

    /// Erases a member. Erasing an absent member is a no-op.
    pub fn erase(&mut self, member: &N) {
        let pos = self.position_of(&member.ring_id());
        if self.ring.remove(&pos).is_some() {
            debug!(member = %pos.id, "ring erase");
        }
    }

    /// Number of members on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Whether the given member is on the ring.
    #[must_use]
    pub fn contains(&self, member: &N) -> bool {
        self.ring.contains_key(&self.position_of(&member.ring_id()))
    }

    /// The member at the smallest position ≥ the key's hash, wrapping past
    /// the maximum. `None` only on an empty ring.
    #[must_use]
    pub fn successor(&self, key: &str) -> Option<&N> {
        self.successors(key, 1).into_iter().next()
    }

    /// The next `n` distinct members starting at the key's successor,
    /// wrapping as needed. Yields at most `len()` members.
    #[must_use]
    pub fn successors(&self, key: &str, n: usize) -> Vec<&N> {
        if self.ring.is_empty() {
            return Vec::new();
        }
        let start = Position {
            hash: self.hasher.position(key),
            id: String::new(),
        };
        let count = n.min(self.ring.len());
        self.ring
            .range(start..)
            .chain(self.ring.iter())
            .map(|(_, member)| member)
            .take(count)
            .collect()
    }

    /// Iterates members in ring-position order.
    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.ring.values()
    }
}
