//! The value lattice for DriftKV.
//!
//! Every stored value is a [`LwwRegister`] — a last-writer-wins record over
//! `(timestamp, bytes)`. Concurrent replicas converge by pair-wise merge,
//! which satisfies:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! These properties make replica convergence independent of delivery order,
//! which is all the gossip layer relies on.

mod lww;

pub use lww::LwwRegister;
