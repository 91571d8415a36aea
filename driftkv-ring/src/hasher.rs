//! Ring position hashers.
//!
//! The global and local rings hash different identifier families; the
//! hasher is a zero-sized capability handed to the ring as a type
//! parameter.

use std::hash::Hasher;

/// Maps a member or key identifier to its position on a ring.
pub trait RingHasher: Default {
    /// Returns the ring position for an identifier.
    fn position(&self, id: &str) -> u64;
}

/// CRC-32 positions, used by the global ring over node IPs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Hasher;

impl RingHasher for Crc32Hasher {
    fn position(&self, id: &str) -> u64 {
        u64::from(crc32fast::hash(id.as_bytes()))
    }
}

/// FNV positions over `ip:worker_index`, used by the local worker ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerHasher;

impl RingHasher for WorkerHasher {
    fn position(&self, id: &str) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(id.as_bytes());
        hasher.finish()
    }
}
