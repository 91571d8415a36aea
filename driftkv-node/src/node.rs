//! Node bootstrap and lifecycle.
//!
//! Wires a coordinator and its worker pool onto a transport, seeds the
//! global ring (from config for an existing node, through a seed node for a
//! joining one), and announces the node to peers and clients.

use crate::config::NodeConfig;
use crate::coordinator::{ControlCommand, Coordinator};
use crate::devices::VolumeManager;
use crate::error::{NodeError, NodeResult};
use crate::transport::Transport;
use driftkv_types::{LwwClock, NodeId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How the global ring gets its initial membership.
#[derive(Debug, Clone)]
pub enum Bootstrap {
    /// An existing node: peers come straight from configuration.
    Seeds(Vec<String>),
    /// A new node: fetch the member list from one seed and announce the
    /// join to everyone.
    Join { seed_ip: String },
}

/// A cloneable handle for driving membership commands into a running node.
#[derive(Clone)]
pub struct NodeController {
    control: mpsc::UnboundedSender<ControlCommand>,
}

impl NodeController {
    /// Adds one storage worker.
    pub fn add_worker(&self) -> NodeResult<()> {
        self.send(ControlCommand::AddWorker)
    }

    /// Removes the highest-indexed storage worker.
    pub fn remove_worker(&self) -> NodeResult<()> {
        self.send(ControlCommand::RemoveWorker)
    }

    /// Starts a clean departure from the cluster.
    pub fn self_depart(&self) -> NodeResult<()> {
        self.send(ControlCommand::SelfDepart)
    }

    fn send(&self, command: ControlCommand) -> NodeResult<()> {
        self.control
            .send(command)
            .map_err(|_| NodeError::ChannelClosed)
    }
}

/// A running node: the coordinator task plus its control channel.
pub struct NodeHandle {
    controller: NodeController,
    coordinator: tokio::task::JoinHandle<()>,
}

impl NodeHandle {
    /// A cloneable controller for this node.
    #[must_use]
    pub fn controller(&self) -> NodeController {
        self.controller.clone()
    }

    /// Adds one storage worker.
    pub fn add_worker(&self) -> NodeResult<()> {
        self.controller.add_worker()
    }

    /// Removes the highest-indexed storage worker.
    pub fn remove_worker(&self) -> NodeResult<()> {
        self.controller.remove_worker()
    }

    /// Starts a clean departure from the cluster.
    pub fn self_depart(&self) -> NodeResult<()> {
        self.controller.self_depart()
    }

    /// Waits for the coordinator to terminate (after a clean self-depart).
    pub async fn wait(self) {
        let _ = self.coordinator.await;
    }
}

/// Boots a node: binds the coordinator, seeds the ring, starts the worker
/// pool, announces the join, and spawns the coordinator loop.
pub async fn start(
    config: NodeConfig,
    bootstrap: Bootstrap,
    client_addresses: Vec<String>,
    transport: Arc<dyn Transport>,
    volumes: Arc<dyn VolumeManager>,
) -> NodeResult<NodeHandle> {
    let node = NodeId::new(&config.ip);
    let channels = transport.bind_coordinator(&node)?;
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let clock = LwwClock::new();
    let worker_count = config.worker_count;

    let mut coordinator = Coordinator::new(
        node.clone(),
        config,
        client_addresses.clone(),
        Arc::clone(&transport),
        volumes,
        clock,
        channels,
        control_rx,
    );

    let announcing = matches!(bootstrap, Bootstrap::Join { .. });
    match bootstrap {
        Bootstrap::Seeds(ips) => {
            for ip in ips {
                coordinator.insert_member(&ip);
            }
        }
        Bootstrap::Join { seed_ip } => {
            let seed = NodeId::new(&seed_ip);
            let members = transport.seed_request(&seed.seed_addr()).await?;
            for ip in members.split('|').filter(|ip| !ip.is_empty()) {
                coordinator.insert_member(ip);
            }
        }
    }

    for _ in 0..worker_count {
        coordinator.start_worker()?;
    }

    if announcing {
        for member in coordinator.global_members() {
            if member == node.ip() {
                continue;
            }
            let peer = NodeId::new(&member);
            if let Err(err) = transport.send_push(&peer.node_join_addr(), node.ip().to_string()) {
                warn!(node = %node, peer = %member, %err, "join notice lost");
            }
        }
    }
    for client in &client_addresses {
        let notice = format!("join:{}", node.ip());
        if let Err(err) = transport.send_push(&NodeId::new(client).client_notify_addr(), notice) {
            // Clients are best-effort listeners; they learn of us on their
            // next key-address query regardless.
            tracing::debug!(node = %node, %client, %err, "client notification lost");
        }
    }

    info!(node = %node, workers = worker_count, "node started");
    let coordinator = tokio::spawn(coordinator.run());
    Ok(NodeHandle {
        controller: NodeController {
            control: control_tx,
        },
        coordinator,
    })
}
