//! The storage worker event loop.
//!
//! One worker owns a disjoint partition of the node's key space: a private
//! store directory, the set of keys it holds, and the changeset of keys
//! mutated since its last gossip flush. All state mutations are serialized
//! by the loop; the five inbound channels are never handled concurrently.

use crate::devices::VolumeManager;
use crate::error::NodeResult;
use crate::protocol::{
    ChangesetAddresses, ChangesetRequest, ClientRequest, ClientResponse, Gossip, GossipBatch,
    GossipTuple, RedistributePlan,
};
use crate::transport::{Transport, WorkerChannels};
use driftkv_lattice::LwwRegister;
use driftkv_store::{FileStore, StoreError};
use driftkv_types::{LwwClock, NodeId, WorkerId, SERVER_PORT};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Gossip pacing knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wall-clock flush period.
    pub gossip_period: std::time::Duration,
    /// Changeset size that forces an early flush.
    pub gossip_threshold: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            gossip_period: std::time::Duration::from_secs(5),
            gossip_threshold: 1,
        }
    }
}

/// A single storage worker.
pub struct StorageWorker {
    id: WorkerId,
    config: WorkerConfig,
    store: FileStore,
    clock: LwwClock,
    transport: Arc<dyn Transport>,
    volumes: Arc<dyn VolumeManager>,
    channels: WorkerChannels,
    /// Coordinator endpoints on this node.
    changeset_addr: String,
    depart_done_addr: String,
    /// Keys this worker currently holds.
    key_set: HashSet<String>,
    /// Keys mutated since the last successful flush.
    changeset: HashSet<String>,
}

impl StorageWorker {
    /// Creates a worker over its bound channels and open store.
    pub fn new(
        id: WorkerId,
        config: WorkerConfig,
        store: FileStore,
        clock: LwwClock,
        transport: Arc<dyn Transport>,
        volumes: Arc<dyn VolumeManager>,
        channels: WorkerChannels,
    ) -> Self {
        let node = NodeId::new(id.ip());
        Self {
            id,
            config,
            store,
            clock,
            transport,
            volumes,
            channels,
            changeset_addr: node.changeset_addr(),
            depart_done_addr: node.depart_done_addr(),
            key_set: HashSet::new(),
            changeset: HashSet::new(),
        }
    }

    fn origin_port(&self) -> u16 {
        SERVER_PORT + self.id.index() as u16
    }

    /// Runs the event loop until depart or transport teardown.
    pub async fn run(mut self) {
        info!(worker = %self.id, "storage worker running");
        let mut last_flush = Instant::now();

        loop {
            let deadline = last_flush + self.config.gossip_period;
            // Channels are drained in a fixed priority order; in particular
            // a queued redistribute is always handled before a queued
            // depart, so hand-offs commanded earlier are never lost.
            tokio::select! {
                biased;
                request = self.channels.client.recv() => {
                    let Some((request, reply)) = request else { break };
                    let response = self.handle_client_request(request);
                    let _ = reply.send(response);
                }
                gossip = self.channels.gossip.recv() => {
                    let Some(gossip) = gossip else { break };
                    debug!(worker = %self.id, tuples = gossip.tuples.len(), "distributed gossip");
                    self.apply_gossip(gossip);
                }
                batch = self.channels.local_gossip.recv() => {
                    let Some(batch) = batch else { break };
                    debug!(worker = %self.id, records = batch.len(), "local gossip");
                    self.apply_local_gossip(batch);
                }
                plan = self.channels.redistribute.recv() => {
                    let Some(plan) = plan else { break };
                    self.handle_redistribute(plan);
                }
                device = self.channels.depart.recv() => {
                    let Some(device) = device else { break };
                    self.depart(device).await;
                    break;
                }
                _ = sleep_until(deadline) => {}
            }

            if last_flush.elapsed() >= self.config.gossip_period
                || self.changeset.len() >= self.config.gossip_threshold
            {
                if !self.changeset.is_empty() {
                    self.flush_changeset().await;
                }
                last_flush = Instant::now();
            }
        }

        // Dropping the channel bundle closes every inbound endpoint;
        // messages in flight are dropped, and convergence comes from later
        // gossip rounds.
        info!(worker = %self.id, "storage worker stopped");
    }

    fn handle_client_request(&mut self, request: ClientRequest) -> ClientResponse {
        match request {
            ClientRequest::Get { key } => {
                debug!(worker = %self.id, %key, "get");
                match self.store.read(&key) {
                    Ok(record) => ClientResponse::ok(record.into_value()),
                    Err(StoreError::NotFound(_)) => ClientResponse::fail(),
                    Err(err) => {
                        warn!(worker = %self.id, %key, %err, "get failed");
                        ClientResponse::fail()
                    }
                }
            }
            ClientRequest::Put { key, value } => {
                debug!(worker = %self.id, %key, "put");
                let record = LwwRegister::new(self.clock.tick(), value);
                match self.store.apply(&key, record) {
                    Ok(_) => {
                        self.key_set.insert(key.clone());
                        self.changeset.insert(key);
                        ClientResponse::ok(Vec::new())
                    }
                    Err(err) => {
                        // A failed write never enters the changeset.
                        warn!(worker = %self.id, %key, %err, "put failed");
                        ClientResponse::fail()
                    }
                }
            }
        }
    }

    /// Merges a batch of remote records. Gossip applies never re-enter the
    /// changeset; only client PUTs do.
    fn apply_gossip(&mut self, gossip: Gossip) {
        for tuple in gossip.tuples {
            let record = LwwRegister::new(tuple.timestamp, tuple.value);
            match self.store.apply(&tuple.key, record) {
                Ok(_) => {
                    self.key_set.insert(tuple.key);
                }
                Err(err) => warn!(worker = %self.id, key = %tuple.key, %err, "gossip apply failed"),
            }
        }
    }

    fn apply_local_gossip(&mut self, batch: GossipBatch) {
        for (key, record) in batch {
            match self.store.apply(&key, record) {
                Ok(_) => {
                    self.key_set.insert(key);
                }
                Err(err) => warn!(worker = %self.id, %key, %err, "local gossip apply failed"),
            }
        }
    }

    /// Streams keys to their new owners, then drops the local copies whose
    /// remove flag was set — but only those actually enqueued, so a key is
    /// never deleted without a surviving replica in flight.
    fn handle_redistribute(&mut self, plan: RedistributePlan) {
        debug!(worker = %self.id, destinations = plan.len(), "redistribute");
        let mut addresses: ChangesetAddresses = HashMap::new();
        let mut remove_candidates: HashMap<String, HashSet<String>> = HashMap::new();

        for (destination, entries) in plan {
            for (key, remove) in entries {
                if remove {
                    remove_candidates
                        .entry(key.clone())
                        .or_default()
                        .insert(destination.clone());
                }
                addresses
                    .entry(destination.clone())
                    .or_default()
                    .insert(key);
            }
        }

        let delivered = self.send_gossip(&addresses);

        for (key, destinations) in remove_candidates {
            let handed_off = destinations
                .iter()
                .any(|dest| delivered.contains(&(dest.clone(), key.clone())));
            if !handed_off {
                warn!(worker = %self.id, %key, "hand-off not enqueued; keeping local copy");
                continue;
            }
            if let Err(err) = self.store.remove(&key) {
                warn!(worker = %self.id, %key, %err, "failed to unlink value file");
            }
            self.key_set.remove(&key);
            self.changeset.remove(&key);
        }
    }

    /// Drains the whole partition and exits: hand off every owned key,
    /// detach the backing volume, acknowledge to the coordinator.
    async fn depart(&mut self, device_id: String) {
        info!(worker = %self.id, device = %device_id, "depart command");
        let request = ChangesetRequest {
            origin_port: self.origin_port(),
            keys: self.key_set.clone(),
            local_only: true,
        };
        match self.transport.changeset_request(&self.changeset_addr, request).await {
            Ok(addresses) => {
                let handed_off: HashSet<String> = self
                    .send_gossip(&addresses)
                    .into_iter()
                    .map(|(_, key)| key)
                    .collect();
                for key in handed_off {
                    if let Err(err) = self.store.remove(&key) {
                        warn!(worker = %self.id, %key, %err, "failed to unlink value file");
                    }
                    self.key_set.remove(&key);
                }
            }
            Err(err) => warn!(worker = %self.id, %err, "depart drain resolution failed"),
        }

        if let Err(err) = self.volumes.detach(&device_id, self.id.index()) {
            // Known soft failure: the slot is still freed, no retry.
            warn!(worker = %self.id, device = %device_id, %err, "volume detach failed");
        }

        let ack = format!("{}:{}", device_id, self.id.index());
        if let Err(err) = self.transport.send_push(&self.depart_done_addr, ack) {
            warn!(worker = %self.id, %err, "depart-done acknowledgment lost");
        }
    }

    /// Resolves the changeset through the coordinator and gossips it out.
    async fn flush_changeset(&mut self) {
        let request = ChangesetRequest {
            origin_port: self.origin_port(),
            keys: self.changeset.clone(),
            local_only: false,
        };
        match self.transport.changeset_request(&self.changeset_addr, request).await {
            Ok(addresses) => {
                self.send_gossip(&addresses);
                self.changeset.clear();
            }
            Err(err) => {
                // Keep the changeset; the next flush retries.
                warn!(worker = %self.id, %err, "changeset address resolution failed");
            }
        }
    }

    /// Reads the current record for every key and sends one gossip message
    /// per destination — an owned batch over the in-process channel for
    /// local workers, a serialized batch for remote ones.
    ///
    /// Returns the `(destination, key)` pairs successfully enqueued.
    fn send_gossip(&self, addresses: &ChangesetAddresses) -> HashSet<(String, String)> {
        let mut local_groups: HashMap<String, (GossipBatch, Vec<(String, String)>)> =
            HashMap::new();
        let mut remote_groups: HashMap<String, (Gossip, Vec<(String, String)>)> = HashMap::new();

        for (destination, keys) in addresses {
            let target = match WorkerId::from_address(destination) {
                Ok(target) => target,
                Err(err) => {
                    warn!(worker = %self.id, %destination, %err, "bad gossip destination");
                    continue;
                }
            };
            for key in keys {
                let record = match self.store.read(key) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(worker = %self.id, %key, %err, "skipping unreadable key in gossip");
                        continue;
                    }
                };
                let staged = (destination.clone(), key.clone());
                if target.ip() == self.id.ip() {
                    let (batch, staged_keys) =
                        local_groups.entry(target.local_gossip_addr()).or_default();
                    batch.insert(key.clone(), record);
                    staged_keys.push(staged);
                } else {
                    let (gossip, staged_keys) =
                        remote_groups.entry(target.gossip_addr()).or_default();
                    gossip.tuples.push(GossipTuple {
                        key: key.clone(),
                        timestamp: record.timestamp(),
                        value: record.into_value(),
                    });
                    staged_keys.push(staged);
                }
            }
        }

        let mut delivered = HashSet::new();
        for (addr, (batch, staged)) in local_groups {
            debug!(worker = %self.id, %addr, records = batch.len(), "local gossip out");
            match self.transport.send_local_gossip(&addr, batch) {
                Ok(()) => delivered.extend(staged),
                Err(err) => warn!(worker = %self.id, %addr, %err, "local gossip send failed"),
            }
        }
        for (addr, (gossip, staged)) in remote_groups {
            debug!(worker = %self.id, %addr, tuples = gossip.tuples.len(), "distributed gossip out");
            match self.transport.send_gossip(&addr, gossip) {
                Ok(()) => delivered.extend(staged),
                Err(err) => warn!(worker = %self.id, %addr, %err, "distributed gossip send failed"),
            }
        }
        delivered
    }
}

/// Binds a worker's endpoints, opens its store slice, and spawns its loop.
pub fn spawn_worker(
    id: WorkerId,
    config: WorkerConfig,
    ebs_root: &Path,
    clock: LwwClock,
    transport: Arc<dyn Transport>,
    volumes: Arc<dyn VolumeManager>,
) -> NodeResult<tokio::task::JoinHandle<()>> {
    let channels = transport.bind_worker(&id)?;
    let store = FileStore::open(ebs_root, id.index())?;
    let worker = StorageWorker::new(id, config, store, clock, transport, volumes, channels);
    Ok(tokio::spawn(worker.run()))
}
