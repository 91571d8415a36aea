//! The per-node coordinator.
//!
//! The coordinator owns the global ring, the local worker ring, the
//! placement map, and the device map. It only resolves addresses and drives
//! membership changes — it never proxies data; workers exchange value
//! records directly.

use crate::config::NodeConfig;
use crate::devices::{DeviceMap, VolumeManager};
use crate::error::NodeResult;
use crate::protocol::{
    ChangesetAddresses, ChangesetRequest, KeyAddresses, KeyRequest, KeyResponse, RedistributePlan,
};
use crate::transport::{CoordinatorChannels, Transport};
use crate::worker::{spawn_worker, WorkerConfig};
use driftkv_ring::{placement, GlobalRing, LocalRing, RingMember};
use driftkv_types::{LwwClock, NodeId, WorkerId};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Storage tier of a key. The durable worker pool is the only tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Durable,
}

/// Replication metadata for one key.
///
/// Created lazily on first resolution with the configured defaults and
/// never silently changed afterwards.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub tier: Tier,
    pub global_replication: usize,
    pub local_replication: usize,
}

/// Local control commands, the in-process analogue of an operator channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Add one storage worker (and its backing device).
    AddWorker,
    /// Remove the highest-indexed storage worker.
    RemoveWorker,
    /// Leave the cluster, handing all data off first.
    SelfDepart,
}

/// The coordinator task state.
pub struct Coordinator {
    node: NodeId,
    config: NodeConfig,
    client_addresses: Vec<String>,
    transport: Arc<dyn Transport>,
    volumes: Arc<dyn VolumeManager>,
    clock: LwwClock,
    channels: CoordinatorChannels,
    control: mpsc::UnboundedReceiver<ControlCommand>,
    global_ring: GlobalRing,
    local_ring: LocalRing,
    placement_map: HashMap<String, KeyInfo>,
    active_workers: BTreeSet<usize>,
    devices: DeviceMap,
    next_worker_index: usize,
    draining: bool,
}

impl Coordinator {
    /// Creates a coordinator with itself as the global ring's only member
    /// and no workers yet; the node wiring seeds members and starts the
    /// initial worker pool before `run`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: NodeId,
        config: NodeConfig,
        client_addresses: Vec<String>,
        transport: Arc<dyn Transport>,
        volumes: Arc<dyn VolumeManager>,
        clock: LwwClock,
        channels: CoordinatorChannels,
        control: mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Self {
        let mut global_ring = GlobalRing::new();
        global_ring.insert(node.clone());
        Self {
            node,
            config,
            client_addresses,
            transport,
            volumes,
            clock,
            channels,
            control,
            global_ring,
            local_ring: LocalRing::new(),
            placement_map: HashMap::new(),
            active_workers: BTreeSet::new(),
            devices: DeviceMap::new(),
            next_worker_index: 1,
            draining: false,
        }
    }

    /// Adds a peer to the global ring (bootstrap seeding).
    pub fn insert_member(&mut self, ip: &str) {
        self.global_ring.insert(NodeId::new(ip));
    }

    /// The global ring membership, in ring order.
    #[must_use]
    pub fn global_members(&self) -> Vec<String> {
        self.global_ring.iter().map(|n| n.ip().to_string()).collect()
    }

    fn default_key_info(&self) -> KeyInfo {
        KeyInfo {
            tier: Tier::Durable,
            global_replication: self.config.global_replication,
            local_replication: self.config.local_replication,
        }
    }

    /// Runs the event loop until a clean self-depart completes.
    pub async fn run(mut self) {
        info!(node = %self.node, workers = self.active_workers.len(), "coordinator running");
        loop {
            tokio::select! {
                biased;
                Some(reply) = self.channels.seed.recv() => {
                    debug!(node = %self.node, "seed address request");
                    let _ = reply.send(self.global_members().join("|"));
                }
                Some(ip) = self.channels.node_join.recv() => {
                    self.handle_node_join(ip).await;
                }
                Some(ip) = self.channels.node_depart.recv() => {
                    info!(node = %self.node, departing = %ip, "node departure");
                    self.global_ring.erase(&NodeId::new(ip));
                }
                Some((request, reply)) = self.channels.key_exchange.recv() => {
                    let response = self.handle_key_request(request);
                    let _ = reply.send(response);
                }
                Some((request, reply)) = self.channels.changeset.recv() => {
                    let response = self.handle_changeset_request(request).await;
                    let _ = reply.send(response);
                }
                Some(message) = self.channels.depart_done.recv() => {
                    self.handle_depart_done(message);
                }
                Some(_) = self.channels.self_depart.recv() => {
                    self.handle_self_depart().await;
                }
                command = self.control.recv() => match command {
                    Some(ControlCommand::AddWorker) => {
                        if let Err(err) = self.start_worker() {
                            warn!(node = %self.node, %err, "worker add failed");
                        }
                    }
                    Some(ControlCommand::RemoveWorker) => self.remove_worker(),
                    Some(ControlCommand::SelfDepart) => self.handle_self_depart().await,
                    None => break,
                },
                else => break,
            }

            if self.draining && self.active_workers.is_empty() {
                info!(node = %self.node, "all workers departed; node terminated");
                break;
            }
        }
    }

    /// Allocates a device, spawns a worker on it, and repartitions placed
    /// keys onto the newcomer. Also the bootstrap path for the initial
    /// pool, where the placement map is still empty.
    pub fn start_worker(&mut self) -> NodeResult<()> {
        if self.draining {
            warn!(node = %self.node, "ignoring worker add while draining");
            return Ok(());
        }
        let index = self.next_worker_index;
        let device = self.devices.allocate(index)?;
        info!(node = %self.node, worker = index, device = %device, "adding worker");

        if let Err(err) = self.volumes.attach(&device, index) {
            self.devices.release(&device, index);
            return Err(err);
        }

        let worker = WorkerId::new(self.node.ip(), index);
        let worker_config = WorkerConfig {
            gossip_period: self.config.gossip_period,
            gossip_threshold: self.config.gossip_threshold,
        };
        // Workers run detached; their lifecycle ends at depart-done, not at
        // a join.
        let _ = spawn_worker(
            worker.clone(),
            worker_config,
            &self.config.ebs_root,
            self.clock.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.volumes),
        )?;

        self.next_worker_index += 1;
        self.active_workers.insert(index);
        self.local_ring.insert(worker.clone());
        self.repartition_to(&worker);
        Ok(())
    }

    /// For every placed key the new worker now replicates, tells the one
    /// hand-off source worker to stream it over (deleting its copy only if
    /// the ring outgrew the replication factor).
    fn repartition_to(&self, newcomer: &WorkerId) {
        let target_address = newcomer.id();
        let mut plans: HashMap<String, RedistributePlan> = HashMap::new();

        for (key, info) in &self.placement_map {
            let p = placement(
                &self.local_ring,
                key,
                info.local_replication,
                &newcomer.ring_id(),
            );
            if !p.is_responsible {
                continue;
            }
            let Some(source) = p.handoff_peer else { continue };
            if source.ring_id() == newcomer.ring_id() {
                continue;
            }
            plans
                .entry(source.redistribute_addr())
                .or_default()
                .entry(target_address.clone())
                .or_default()
                .insert((key.clone(), p.remove_on_handoff));
        }

        for (addr, plan) in plans {
            if let Err(err) = self.transport.send_redistribute(&addr, plan) {
                warn!(node = %self.node, %addr, %err, "redistribute dispatch failed");
            }
        }
    }

    /// Sends the highest-indexed worker into depart.
    fn remove_worker(&mut self) {
        let Some(&index) = self.active_workers.iter().next_back() else {
            warn!(node = %self.node, "no remaining workers; nothing to remove");
            return;
        };
        info!(node = %self.node, worker = index, "removing worker");

        let worker = WorkerId::new(self.node.ip(), index);
        self.local_ring.erase(&worker);
        self.active_workers.remove(&index);

        let device = self
            .devices
            .device_for(index)
            .unwrap_or_default()
            .to_string();
        if let Err(err) = self.transport.send_push(&worker.depart_addr(), device) {
            warn!(node = %self.node, worker = index, %err, "depart command lost");
        }
    }

    /// A new node joined: for every placed key it now replicates where this
    /// node is the canonical sender, resolve the target workers on the new
    /// node and dispatch redistributes to the local replicas.
    async fn handle_node_join(&mut self, new_ip: String) {
        info!(node = %self.node, joining = %new_ip, "node join");
        let new_node = NodeId::new(&new_ip);
        self.global_ring.insert(new_node.clone());
        if new_ip == self.node.ip() {
            return;
        }

        let mut keys_to_query = Vec::new();
        let mut remove_flags: HashMap<String, bool> = HashMap::new();
        for (key, info) in &self.placement_map {
            let p = placement(
                &self.global_ring,
                key,
                info.global_replication,
                &new_node.ring_id(),
            );
            if !p.is_responsible {
                continue;
            }
            // Only the canonical sender migrates the key; every other
            // replica leaves it to them.
            let sender_is_self = p
                .handoff_peer
                .as_ref()
                .is_some_and(|peer| peer.ip() == self.node.ip());
            if sender_is_self {
                keys_to_query.push(key.clone());
                remove_flags.insert(key.clone(), p.remove_on_handoff);
            }
        }
        if keys_to_query.is_empty() {
            return;
        }

        let request = KeyRequest {
            sender: "server".to_string(),
            keys: keys_to_query,
        };
        let response = match self
            .transport
            .key_request(&new_node.key_exchange_addr(), request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(node = %self.node, joining = %new_ip, %err, "key exchange with joiner failed");
                return;
            }
        };

        let mut plans: HashMap<String, RedistributePlan> = HashMap::new();
        for KeyAddresses { key, addresses } in response.tuples {
            let remove = remove_flags.get(&key).copied().unwrap_or(false);
            let local_rep = self
                .placement_map
                .get(&key)
                .map_or(self.config.local_replication, |info| info.local_replication);
            for target in addresses {
                for worker in self.local_ring.successors(&key, local_rep) {
                    plans
                        .entry(worker.redistribute_addr())
                        .or_default()
                        .entry(target.clone())
                        .or_default()
                        .insert((key.clone(), remove));
                }
            }
        }
        for (addr, plan) in plans {
            if let Err(err) = self.transport.send_redistribute(&addr, plan) {
                warn!(node = %self.node, %addr, %err, "redistribute dispatch failed");
            }
        }
    }

    /// Answers a key-address query with the `local_rep` worker addresses
    /// serving each key, lazily creating placement metadata.
    fn handle_key_request(&mut self, request: KeyRequest) -> KeyResponse {
        debug!(node = %self.node, sender = %request.sender, keys = request.keys.len(), "key address request");
        let default = self.default_key_info();
        let mut tuples = Vec::new();
        for key in request.keys {
            let info = self
                .placement_map
                .entry(key.clone())
                .or_insert_with(|| default.clone());
            let addresses = self
                .local_ring
                .successors(&key, info.local_replication)
                .iter()
                .map(|worker| worker.id())
                .collect();
            tuples.push(KeyAddresses { key, addresses });
        }
        KeyResponse { tuples }
    }

    /// Resolves a worker's changeset into gossip destinations: the other
    /// local replicas, plus (unless `local_only`) the worker addresses of
    /// every other responsible node obtained by nested key exchange.
    async fn handle_changeset_request(&mut self, request: ChangesetRequest) -> ChangesetAddresses {
        let requester = format!("{}:{}", self.node.ip(), request.origin_port);
        debug!(node = %self.node, %requester, keys = request.keys.len(), "changeset address request");

        let default = self.default_key_info();
        let mut addresses: ChangesetAddresses = HashMap::new();
        let mut remote_keys: HashMap<NodeId, HashSet<String>> = HashMap::new();

        for key in &request.keys {
            let info = self
                .placement_map
                .entry(key.clone())
                .or_insert_with(|| default.clone());
            let (local_rep, global_rep) = (info.local_replication, info.global_replication);

            for worker in self.local_ring.successors(key, local_rep) {
                if worker.id() != requester {
                    addresses.entry(worker.id()).or_default().insert(key.clone());
                }
            }

            if !request.local_only {
                for node in self.global_ring.successors(key, global_rep) {
                    if node.ip() != self.node.ip() {
                        remote_keys.entry(node.clone()).or_default().insert(key.clone());
                    }
                }
            }
        }

        for (node, keys) in remote_keys {
            let request = KeyRequest {
                sender: "server".to_string(),
                keys: keys.into_iter().collect(),
            };
            match self
                .transport
                .key_request(&node.key_exchange_addr(), request)
                .await
            {
                Ok(response) => {
                    for KeyAddresses { key, addresses: addrs } in response.tuples {
                        for addr in addrs {
                            addresses.entry(addr).or_default().insert(key.clone());
                        }
                    }
                }
                Err(err) => {
                    // The keys stay in the worker's changeset semantics-wise:
                    // they simply gossip again next round.
                    warn!(node = %self.node, peer = %node, %err, "nested key exchange failed");
                }
            }
        }

        addresses
    }

    /// A worker finished draining: free its device slot for reuse and drop
    /// it from the local ring.
    fn handle_depart_done(&mut self, message: String) {
        let Some((device, index)) = message.rsplit_once(':') else {
            warn!(node = %self.node, %message, "malformed depart-done acknowledgment");
            return;
        };
        let Ok(index) = index.parse::<usize>() else {
            warn!(node = %self.node, %message, "malformed depart-done acknowledgment");
            return;
        };
        info!(node = %self.node, worker = index, device, "worker departed");
        self.devices.release(device, index);
        self.local_ring.erase(&WorkerId::new(self.node.ip(), index));
        self.active_workers.remove(&index);
    }

    /// Leaves the cluster: notify members and clients, hand every placed
    /// key off to the surviving replica set (replication preserved, so no
    /// removal pressure on them), then drive every worker into depart.
    async fn handle_self_depart(&mut self) {
        if self.draining {
            return;
        }
        info!(node = %self.node, "node departing");
        self.draining = true;
        let node = self.node.clone();
        self.global_ring.erase(&node);

        for member in self.global_ring.iter() {
            if let Err(err) = self
                .transport
                .send_push(&member.node_depart_addr(), self.node.ip().to_string())
            {
                warn!(node = %self.node, peer = %member, %err, "departure notice lost");
            }
        }
        for client in &self.client_addresses {
            let notice = format!("depart:{}", self.node.ip());
            if let Err(err) = self
                .transport
                .send_push(&NodeId::new(client).client_notify_addr(), notice)
            {
                debug!(node = %self.node, %client, %err, "client notification lost");
            }
        }

        // Group every placed key by the responsible surviving nodes.
        let mut requests: HashMap<NodeId, HashSet<String>> = HashMap::new();
        for (key, info) in &self.placement_map {
            for node in self.global_ring.successors(key, info.global_replication) {
                requests.entry(node.clone()).or_default().insert(key.clone());
            }
        }

        let mut plans: HashMap<String, RedistributePlan> = HashMap::new();
        for (node, keys) in requests {
            let request = KeyRequest {
                sender: "server".to_string(),
                keys: keys.into_iter().collect(),
            };
            let response = match self
                .transport
                .key_request(&node.key_exchange_addr(), request)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(node = %self.node, peer = %node, %err, "key exchange failed during depart");
                    continue;
                }
            };
            for KeyAddresses { key, addresses } in response.tuples {
                let local_rep = self
                    .placement_map
                    .get(&key)
                    .map_or(self.config.local_replication, |info| info.local_replication);
                for target in addresses {
                    for worker in self.local_ring.successors(&key, local_rep) {
                        plans
                            .entry(worker.redistribute_addr())
                            .or_default()
                            .entry(target.clone())
                            .or_default()
                            .insert((key.clone(), false));
                    }
                }
            }
        }
        for (addr, plan) in plans {
            if let Err(err) = self.transport.send_redistribute(&addr, plan) {
                warn!(node = %self.node, %addr, %err, "redistribute dispatch failed");
            }
        }

        // Drive every worker down; each acknowledges on depart-done and the
        // run loop terminates once the pool is empty.
        for index in self.active_workers.clone() {
            let worker = WorkerId::new(self.node.ip(), index);
            let device = self
                .devices
                .device_for(index)
                .unwrap_or_default()
                .to_string();
            if let Err(err) = self.transport.send_push(&worker.depart_addr(), device) {
                warn!(node = %self.node, worker = index, %err, "depart command lost");
            }
        }
    }
}
