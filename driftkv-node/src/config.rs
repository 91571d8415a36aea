//! Node configuration and the `conf/server/` file loaders.
//!
//! A missing config file is fatal at coordinator initialization; there is
//! no degraded mode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Relative path of the client address list.
pub const CLIENT_ADDRESS_FILE: &str = "conf/server/client_address.txt";
/// Relative path of the initial server list (existing node start).
pub const START_SERVERS_FILE: &str = "conf/server/start_servers.txt";
/// Relative path of the seed server address (new node start).
pub const SEED_SERVER_FILE: &str = "conf/server/seed_server.txt";
/// Relative path of the value-store root path.
pub const EBS_ROOT_FILE: &str = "conf/server/ebs_root.txt";

/// Errors raised by config loading. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config file {path}: {source}")]
    Missing {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("config file {0} is empty")]
    Empty(String),
}

/// Runtime parameters for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's IP, as other cluster members address it.
    pub ip: String,
    /// Number of storage workers started at boot.
    pub worker_count: usize,
    /// Replication factor on the local worker ring.
    pub local_replication: usize,
    /// Replication factor on the global node ring.
    pub global_replication: usize,
    /// Wall-clock gossip flush period.
    pub gossip_period: Duration,
    /// Changeset size that forces an early flush.
    pub gossip_threshold: usize,
    /// Root under which per-worker store directories live.
    pub ebs_root: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            worker_count: 3,
            local_replication: 2,
            global_replication: 2,
            gossip_period: Duration::from_secs(5),
            gossip_threshold: 1,
            ebs_root: PathBuf::from("ebs"),
        }
    }
}

fn read_config(base: &Path, relative: &str) -> Result<String, ConfigError> {
    let path = base.join(relative);
    fs::read_to_string(&path).map_err(|source| ConfigError::Missing {
        path: path.display().to_string(),
        source,
    })
}

fn non_empty_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loads the client proxy addresses, one IP per line.
pub fn load_client_addresses(base: &Path) -> Result<Vec<String>, ConfigError> {
    Ok(non_empty_lines(&read_config(base, CLIENT_ADDRESS_FILE)?))
}

/// Loads the peer IPs that seed the global ring of an existing node.
pub fn load_start_servers(base: &Path) -> Result<Vec<String>, ConfigError> {
    Ok(non_empty_lines(&read_config(base, START_SERVERS_FILE)?))
}

/// Loads the single seed IP a new node joins through.
pub fn load_seed_server(base: &Path) -> Result<String, ConfigError> {
    non_empty_lines(&read_config(base, SEED_SERVER_FILE)?)
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::Empty(SEED_SERVER_FILE.to_string()))
}

/// Loads the value-store root path, normalizing the trailing slash.
pub fn load_ebs_root(base: &Path) -> Result<PathBuf, ConfigError> {
    let line = non_empty_lines(&read_config(base, EBS_ROOT_FILE)?)
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::Empty(EBS_ROOT_FILE.to_string()))?;
    let normalized = if line.ends_with('/') {
        line
    } else {
        format!("{line}/")
    };
    Ok(PathBuf::from(normalized))
}
