//! File-backed value storage for DriftKV workers.
//!
//! Each storage worker owns a disjoint directory `<ebs_root>/ebs_<index>/`
//! on its backing device, with one serialized [`LwwRegister`] record per key
//! file. The store is single-writer by construction: only the owning
//! worker's event loop touches it, so there is no locking.
//!
//! Writes always go through [`FileStore::apply`], which merges the incoming
//! record with whatever is on disk; the stored timestamp therefore never
//! decreases.

mod error;
mod file_store;

pub use error::{StoreError, StoreResult};
pub use file_store::FileStore;

pub use driftkv_lattice::LwwRegister;
