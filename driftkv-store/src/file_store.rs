//! The file-per-key record store.

use crate::error::{StoreError, StoreResult};
use driftkv_lattice::LwwRegister;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A worker's private slice of the value store.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the store directory for one worker.
    pub fn open(ebs_root: impl AsRef<Path>, worker_index: usize) -> StoreResult<Self> {
        let root = ebs_root.as_ref().join(format!("ebs_{worker_index}"));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Reads the record for a key.
    ///
    /// A missing file is `NotFound`; an unparseable file is `Corrupt` and is
    /// left in place (no destructive recovery).
    pub fn read(&self, key: &str) -> StoreResult<LwwRegister> {
        let bytes = match fs::read(self.path_for(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| {
            warn!(key, "failed to parse stored record");
            StoreError::Corrupt {
                key: key.to_string(),
                source,
            }
        })
    }

    /// Merges an incoming record into the stored one and writes it back,
    /// returning the merged record.
    ///
    /// An absent record merges as the lattice identity. A corrupt record is
    /// an error: nothing is written and the file is left in place.
    pub fn apply(&self, key: &str, incoming: LwwRegister) -> StoreResult<LwwRegister> {
        let merged = match self.read(key) {
            Ok(existing) => existing.merged(&incoming),
            Err(StoreError::NotFound(_)) => incoming,
            Err(err) => return Err(err),
        };
        let bytes = serde_json::to_vec(&merged)?;
        fs::write(self.path_for(key), bytes)?;
        Ok(merged)
    }

    /// Unlinks the value file for a key.
    pub fn remove(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
