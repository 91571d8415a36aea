//! The process-wide last-writer-wins timestamp counter.
//!
//! Every PUT on any worker of this node draws its timestamp here. The
//! counter is the only mutable state shared between threads; it relies on
//! nothing beyond monotonicity, so relaxed ordering is sufficient.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cloneable handle to the node's monotone LWW timestamp counter.
///
/// Clones share the same counter. Timestamps start above zero so that the
/// lattice identity element `(0, "")` is never produced by a live write.
#[derive(Debug, Clone, Default)]
pub struct LwwClock {
    counter: Arc<AtomicU64>,
}

impl LwwClock {
    /// Creates a fresh clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter and returns the new timestamp.
    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the most recently issued timestamp without advancing.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
