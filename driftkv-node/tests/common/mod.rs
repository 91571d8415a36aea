#![allow(dead_code)]

use driftkv_node::protocol::{ClientRequest, KeyRequest};
use driftkv_node::{InProcTransport, NodeConfig, NodeResult, Transport, VolumeManager};
use driftkv_types::{NodeId, WorkerId};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Polls an async condition until it holds, or panics after ~2 seconds.
/// Convergence is eventual, never immediate.
macro_rules! eventually {
    ($cond:expr, $what:expr) => {{
        let mut satisfied = false;
        for _ in 0..200 {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(satisfied, "timed out waiting for {}", $what);
    }};
}
pub(crate) use eventually;

/// Node configuration tuned for tests: prompt gossip, per-node store roots.
pub fn test_config(ip: &str, root: &Path) -> NodeConfig {
    NodeConfig {
        ip: ip.to_string(),
        worker_count: 3,
        local_replication: 2,
        global_replication: 2,
        gossip_period: Duration::from_millis(50),
        gossip_threshold: 1,
        ebs_root: root.join(ip),
    }
}

/// Resolves the worker addresses serving `key` through a node's
/// coordinator, the way a client would.
pub async fn resolve(transport: &Arc<InProcTransport>, node_ip: &str, key: &str) -> Vec<String> {
    let request = KeyRequest {
        sender: "client".to_string(),
        keys: vec![key.to_string()],
    };
    let response = transport
        .key_request(&NodeId::new(node_ip).key_exchange_addr(), request)
        .await
        .expect("key exchange reachable");
    response
        .tuples
        .into_iter()
        .next()
        .map(|tuple| tuple.addresses)
        .unwrap_or_default()
}

/// PUTs through a worker's client endpoint; false when the worker is gone.
pub async fn put(transport: &Arc<InProcTransport>, worker_addr: &str, key: &str, value: &[u8]) -> bool {
    let worker = WorkerId::from_address(worker_addr).unwrap();
    transport
        .client_request(
            &worker.client_addr(),
            ClientRequest::Put {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )
        .await
        .map(|response| response.succeed)
        .unwrap_or(false)
}

/// GETs through a worker's client endpoint; `None` on failure or absence.
pub async fn get(transport: &Arc<InProcTransport>, worker_addr: &str, key: &str) -> Option<Vec<u8>> {
    let worker = WorkerId::from_address(worker_addr).unwrap();
    let response = transport
        .client_request(
            &worker.client_addr(),
            ClientRequest::Get {
                key: key.to_string(),
            },
        )
        .await
        .ok()?;
    response.succeed.then_some(response.value)
}

/// Whether every replica worker of `key` on `node_ip` currently serves
/// `value`, under a fresh address resolution.
pub async fn converged(
    transport: &Arc<InProcTransport>,
    node_ip: &str,
    key: &str,
    value: &[u8],
) -> bool {
    let replicas = resolve(transport, node_ip, key).await;
    for addr in &replicas {
        if get(transport, addr, key).await.as_deref() != Some(value) {
            return false;
        }
    }
    !replicas.is_empty()
}

/// A volume manager that records attach/detach calls for assertions.
#[derive(Debug, Default)]
pub struct RecordingVolumes {
    events: Mutex<Vec<(&'static str, String, usize)>>,
}

impl RecordingVolumes {
    pub fn attached(&self) -> Vec<(String, usize)> {
        self.filtered("attach")
    }

    pub fn detached(&self) -> Vec<(String, usize)> {
        self.filtered("detach")
    }

    fn filtered(&self, op: &str) -> Vec<(String, usize)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _, _)| *kind == op)
            .map(|(_, device, index)| (device.clone(), *index))
            .collect()
    }
}

impl VolumeManager for RecordingVolumes {
    fn attach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(("attach", device_id.to_string(), worker_index));
        Ok(())
    }

    fn detach(&self, device_id: &str, worker_index: usize) -> NodeResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(("detach", device_id.to_string(), worker_index));
        Ok(())
    }
}
