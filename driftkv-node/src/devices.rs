//! Backing-device naming and the volume attach/detach seam.
//!
//! Device identifiers are two lowercase letters starting at `"ba"` (the
//! smallest name the block-device layer accepts) and incremented
//! lexicographically. The map is ordered so names stay deterministic under
//! add/remove churn: a freed slot is preferred over minting a new name.

use crate::error::{NodeError, NodeResult};
use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use tracing::{debug, info, warn};

/// The first allocatable device identifier.
const FIRST_DEVICE_ID: &str = "ba";

/// Size in GB passed to the attach script for new volumes.
const VOLUME_SIZE_GB: u32 = 10;

/// Returns the lexicographic successor of a two-letter device id.
fn next_device_id(current: &str) -> NodeResult<String> {
    let mut chars: Vec<char> = current.chars().collect();
    debug_assert_eq!(chars.len(), 2);
    match chars[1] {
        'z' => match chars[0] {
            'z' => return Err(NodeError::DeviceSpaceExhausted),
            first => {
                chars[0] = (first as u8 + 1) as char;
                chars[1] = 'a';
            }
        },
        second => chars[1] = (second as u8 + 1) as char,
    }
    Ok(chars.into_iter().collect())
}

/// Ordered device-id → worker assignments, with freed slots kept for reuse.
#[derive(Debug, Default)]
pub struct DeviceMap {
    slots: BTreeMap<String, Option<usize>>,
    by_worker: HashMap<usize, String>,
}

impl DeviceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a device id for a worker: the lowest freed slot if any,
    /// otherwise the successor of the highest id handed out so far.
    pub fn allocate(&mut self, worker_index: usize) -> NodeResult<String> {
        let freed = self
            .slots
            .iter()
            .find(|(_, assignment)| assignment.is_none())
            .map(|(id, _)| id.clone());

        let device_id = match freed {
            Some(id) => id,
            None => match self.slots.keys().next_back() {
                Some(highest) => next_device_id(highest)?,
                None => FIRST_DEVICE_ID.to_string(),
            },
        };

        debug!(device = %device_id, worker = worker_index, "device allocated");
        self.slots.insert(device_id.clone(), Some(worker_index));
        self.by_worker.insert(worker_index, device_id.clone());
        Ok(device_id)
    }

    /// Marks a worker's device slot free for reuse.
    pub fn release(&mut self, device_id: &str, worker_index: usize) {
        if let Some(slot) = self.slots.get_mut(device_id) {
            *slot = None;
        }
        self.by_worker.remove(&worker_index);
    }

    /// The device currently assigned to a worker.
    #[must_use]
    pub fn device_for(&self, worker_index: usize) -> Option<&str> {
        self.by_worker.get(&worker_index).map(String::as_str)
    }

    /// Whether any worker still holds a device.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.by_worker.is_empty()
    }
}

/// The external attach/detach side effect for backing volumes.
///
/// Volumes are acquired before a worker starts and released on its depart,
/// so the device's lifetime is scoped to the worker's.
pub trait VolumeManager: Send + Sync {
    /// Attaches the volume for a worker before its thread starts.
    fn attach(&self, device_id: &str, worker_index: usize) -> NodeResult<()>;

    /// Detaches a departing worker's volume.
    fn detach(&self, device_id: &str, worker_index: usize) -> NodeResult<()>;
}

/// Drives the real block-device scripts.
#[derive(Debug, Default)]
pub struct ShellVolumes;

impl ShellVolumes {
    fn run(script: &str, args: &[String]) -> NodeResult<()> {
        let status = Command::new(script)
            .args(args)
            .status()
            .map_err(|err| NodeError::Volume(format!("{script}: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(NodeError::Volume(format!("{script} exited with {status}")))
        }
    }
}

impl VolumeManager for ShellVolumes {
    fn attach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        info!(device = device_id, worker = worker_index, "attaching volume");
        Self::run(
            "scripts/add_volume.sh",
            &[
                device_id.to_string(),
                VOLUME_SIZE_GB.to_string(),
                worker_index.to_string(),
            ],
        )
    }

    fn detach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        info!(device = device_id, worker = worker_index, "detaching volume");
        Self::run(
            "scripts/remove_volume.sh",
            &[device_id.to_string(), worker_index.to_string()],
        )
    }
}

/// No-op volumes for runs without backing block devices.
#[derive(Debug, Default)]
pub struct NoopVolumes;

impl VolumeManager for NoopVolumes {
    fn attach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        debug!(device = device_id, worker = worker_index, "volume attach (noop)");
        Ok(())
    }

    fn detach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        debug!(device = device_id, worker = worker_index, "volume detach (noop)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_ba() {
        let mut devices = DeviceMap::new();
        assert_eq!(devices.allocate(1).unwrap(), "ba");
        assert_eq!(devices.allocate(2).unwrap(), "bb");
        assert_eq!(devices.device_for(1), Some("ba"));
    }

    #[test]
    fn freed_slot_is_preferred() {
        let mut devices = DeviceMap::new();
        devices.allocate(1).unwrap();
        devices.allocate(2).unwrap();
        devices.allocate(3).unwrap();

        devices.release("bb", 2);
        assert_eq!(devices.device_for(2), None);

        // The freed "bb" wins over minting "bd".
        assert_eq!(devices.allocate(4).unwrap(), "bb");
        assert_eq!(devices.device_for(4), Some("bb"));
    }

    #[test]
    fn successor_carries_into_the_next_letter() {
        assert_eq!(next_device_id("ba").unwrap(), "bb");
        assert_eq!(next_device_id("bz").unwrap(), "ca");
        assert!(matches!(
            next_device_id("zz"),
            Err(NodeError::DeviceSpaceExhausted)
        ));
    }

    #[test]
    fn drained_after_all_releases() {
        let mut devices = DeviceMap::new();
        let a = devices.allocate(1).unwrap();
        let b = devices.allocate(2).unwrap();
        assert!(!devices.is_drained());
        devices.release(&a, 1);
        devices.release(&b, 2);
        assert!(devices.is_drained());
    }
}
