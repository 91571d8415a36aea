//! Last-Writer-Wins register over a timestamped byte value.
//!
//! The lattice order is by timestamp; on equal timestamps the
//! lexicographically greater value wins, so merge is total and
//! deterministic across replicas.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A last-writer-wins register.
///
/// The identity element is `(0, b"")`; callers treat a missing stored record
/// as identity, which makes merge total even when one operand is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    timestamp: u64,
    value: Vec<u8>,
}

impl LwwRegister {
    /// Creates a register from a timestamp and value.
    #[must_use]
    pub fn new(timestamp: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    /// The lattice identity, `(0, b"")`.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Returns the write timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the stored value.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consumes the register, returning the stored value.
    #[must_use]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Whether this register is the identity element.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.timestamp == 0 && self.value.is_empty()
    }

    /// Determines whether the incoming record should win over this one.
    fn should_replace(&self, other: &Self) -> bool {
        match other.timestamp.cmp(&self.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => other.value > self.value,
        }
    }

    /// Merges another register into this one.
    ///
    /// The record with the higher timestamp wins; on a tie the
    /// lexicographically greater value wins. The stored timestamp never
    /// decreases.
    pub fn merge(&mut self, other: &Self) {
        if self.should_replace(other) {
            self.timestamp = other.timestamp;
            self.value = other.value.clone();
        }
    }

    /// Returns the merge of this register and another.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }
}
