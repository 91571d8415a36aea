//! Node runtime for DriftKV.
//!
//! A node runs one coordinator task and a pool of storage-worker tasks.
//! Clients resolve per-key worker addresses through any node's coordinator
//! and then talk to workers directly; coordinators only resolve addresses
//! and drive membership, never proxying data.
//!
//! The crate is organized the way the data flows:
//! - [`protocol`] — wire messages and in-process command shapes
//! - [`transport`] — the endpoint seam and its in-process implementation
//! - [`worker`] — the storage-worker event loop
//! - [`coordinator`] — placement resolution and membership handling
//! - [`devices`] — backing-device naming and the volume side-effect seam
//! - [`config`] — `conf/server/` loaders and runtime parameters
//! - [`node`] — bootstrap wiring

pub mod config;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod node;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use config::{ConfigError, NodeConfig};
pub use coordinator::{ControlCommand, Coordinator, KeyInfo, Tier};
pub use devices::{DeviceMap, NoopVolumes, ShellVolumes, VolumeManager};
pub use error::{NodeError, NodeResult};
pub use node::{start, Bootstrap, NodeController, NodeHandle};
pub use transport::{inproc::InProcTransport, CoordinatorChannels, Transport, WorkerChannels};
pub use worker::{spawn_worker, StorageWorker, WorkerConfig};
