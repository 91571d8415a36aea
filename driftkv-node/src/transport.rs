//! Transport layer abstraction.
//!
//! Workers and the coordinator never talk to sockets directly; they bind
//! their inbound endpoints and send through a [`Transport`], so the same
//! code runs over any push/pull + request/reply substrate. The in-process
//! implementation below is the one the node wiring and the multi-node tests
//! use; real socket transports are external collaborators.

use crate::error::{NodeError, NodeResult};
use crate::protocol::{
    ChangesetAddresses, ChangesetRequest, ClientRequest, ClientResponse, Gossip, GossipBatch,
    KeyRequest, KeyResponse, RedistributePlan,
};
use async_trait::async_trait;
use driftkv_types::{NodeId, WorkerId};
use tokio::sync::{mpsc, oneshot};

/// The inbound channel bundle for one storage worker, in the order the
/// worker polls them.
pub struct WorkerChannels {
    /// Client request/reply.
    pub client: mpsc::UnboundedReceiver<(ClientRequest, oneshot::Sender<ClientResponse>)>,
    /// Distributed gossip pull.
    pub gossip: mpsc::UnboundedReceiver<Gossip>,
    /// Local gossip pull (owned batches).
    pub local_gossip: mpsc::UnboundedReceiver<GossipBatch>,
    /// Local redistribute pull.
    pub redistribute: mpsc::UnboundedReceiver<RedistributePlan>,
    /// Local depart pull; the payload is the backing device id.
    pub depart: mpsc::UnboundedReceiver<String>,
}

/// The inbound channel bundle for a node's coordinator.
pub struct CoordinatorChannels {
    /// Seed-address replies for bootstrapping nodes.
    pub seed: mpsc::UnboundedReceiver<oneshot::Sender<String>>,
    /// Node-join notifications (the joining IP).
    pub node_join: mpsc::UnboundedReceiver<String>,
    /// Node-departure notifications (the departing IP).
    pub node_depart: mpsc::UnboundedReceiver<String>,
    /// Key-address queries from clients and peer coordinators.
    pub key_exchange: mpsc::UnboundedReceiver<(KeyRequest, oneshot::Sender<KeyResponse>)>,
    /// Changeset-address queries from local workers.
    pub changeset: mpsc::UnboundedReceiver<(ChangesetRequest, oneshot::Sender<ChangesetAddresses>)>,
    /// Depart-done acknowledgments (`<device>:<index>`).
    pub depart_done: mpsc::UnboundedReceiver<String>,
    /// Self-depart commands.
    pub self_depart: mpsc::UnboundedReceiver<String>,
}

/// A message transport between workers, coordinators, and clients.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds a worker's five inbound endpoints.
    fn bind_worker(&self, worker: &WorkerId) -> NodeResult<WorkerChannels>;

    /// Binds a coordinator's inbound endpoints.
    fn bind_coordinator(&self, node: &NodeId) -> NodeResult<CoordinatorChannels>;

    /// Sends a client request and waits for the worker's reply.
    async fn client_request(
        &self,
        addr: &str,
        request: ClientRequest,
    ) -> NodeResult<ClientResponse>;

    /// Pushes a distributed-gossip batch.
    fn send_gossip(&self, addr: &str, gossip: Gossip) -> NodeResult<()>;

    /// Hands an owned gossip batch to a local replica.
    fn send_local_gossip(&self, addr: &str, batch: GossipBatch) -> NodeResult<()>;

    /// Pushes a redistribute command to a local worker.
    fn send_redistribute(&self, addr: &str, plan: RedistributePlan) -> NodeResult<()>;

    /// Pushes a bare string message (join/depart notices, depart commands,
    /// depart-done acknowledgments, client notifications).
    fn send_push(&self, addr: &str, message: String) -> NodeResult<()>;

    /// Asks a seed node for its pipe-delimited member list.
    async fn seed_request(&self, addr: &str) -> NodeResult<String>;

    /// Sends a key-address query to a coordinator and waits for the reply.
    async fn key_request(&self, addr: &str, request: KeyRequest) -> NodeResult<KeyResponse>;

    /// Sends a changeset-address query to the local coordinator.
    async fn changeset_request(
        &self,
        addr: &str,
        request: ChangesetRequest,
    ) -> NodeResult<ChangesetAddresses>;
}

pub mod inproc {
    //! The in-process transport: an address registry of typed channels.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    enum Endpoint {
        Client(mpsc::UnboundedSender<(ClientRequest, oneshot::Sender<ClientResponse>)>),
        Gossip(mpsc::UnboundedSender<Gossip>),
        LocalGossip(mpsc::UnboundedSender<GossipBatch>),
        Redistribute(mpsc::UnboundedSender<RedistributePlan>),
        Push(mpsc::UnboundedSender<String>),
        Seed(mpsc::UnboundedSender<oneshot::Sender<String>>),
        KeyExchange(mpsc::UnboundedSender<(KeyRequest, oneshot::Sender<KeyResponse>)>),
        Changeset(
            mpsc::UnboundedSender<(ChangesetRequest, oneshot::Sender<ChangesetAddresses>)>,
        ),
    }

    /// An in-process [`Transport`] shared by every task of one test or
    /// deployment process. Binding an address again replaces the previous
    /// endpoint, which is what a worker restart needs.
    #[derive(Default)]
    pub struct InProcTransport {
        endpoints: Mutex<HashMap<String, Endpoint>>,
    }

    impl InProcTransport {
        /// Creates an empty registry.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn bind(&self, addr: String, endpoint: Endpoint) {
            self.endpoints.lock().unwrap().insert(addr, endpoint);
        }

        /// Binds a bare string-push endpoint, e.g. a client host's
        /// notification listener.
        pub fn bind_push(&self, addr: &str) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.bind(addr.to_string(), Endpoint::Push(tx));
            rx
        }

        fn with_endpoint<T>(
            &self,
            addr: &str,
            f: impl FnOnce(&Endpoint) -> NodeResult<T>,
        ) -> NodeResult<T> {
            let endpoints = self.endpoints.lock().unwrap();
            let endpoint = endpoints
                .get(addr)
                .ok_or_else(|| NodeError::Transport(format!("no endpoint bound at {addr}")))?;
            f(endpoint)
        }

        fn mismatch(addr: &str) -> NodeError {
            NodeError::Transport(format!("endpoint type mismatch at {addr}"))
        }

        fn closed(addr: &str) -> NodeError {
            NodeError::Transport(format!("endpoint at {addr} is gone"))
        }
    }

    #[async_trait]
    impl Transport for InProcTransport {
        fn bind_worker(&self, worker: &WorkerId) -> NodeResult<WorkerChannels> {
            let (client_tx, client) = mpsc::unbounded_channel();
            let (gossip_tx, gossip) = mpsc::unbounded_channel();
            let (lgossip_tx, local_gossip) = mpsc::unbounded_channel();
            let (redist_tx, redistribute) = mpsc::unbounded_channel();
            let (depart_tx, depart) = mpsc::unbounded_channel();

            self.bind(worker.client_addr(), Endpoint::Client(client_tx));
            self.bind(worker.gossip_addr(), Endpoint::Gossip(gossip_tx));
            self.bind(worker.local_gossip_addr(), Endpoint::LocalGossip(lgossip_tx));
            self.bind(worker.redistribute_addr(), Endpoint::Redistribute(redist_tx));
            self.bind(worker.depart_addr(), Endpoint::Push(depart_tx));

            Ok(WorkerChannels {
                client,
                gossip,
                local_gossip,
                redistribute,
                depart,
            })
        }

        fn bind_coordinator(&self, node: &NodeId) -> NodeResult<CoordinatorChannels> {
            let (seed_tx, seed) = mpsc::unbounded_channel();
            let (join_tx, node_join) = mpsc::unbounded_channel();
            let (depart_tx, node_depart) = mpsc::unbounded_channel();
            let (key_tx, key_exchange) = mpsc::unbounded_channel();
            let (changeset_tx, changeset) = mpsc::unbounded_channel();
            let (done_tx, depart_done) = mpsc::unbounded_channel();
            let (self_depart_tx, self_depart) = mpsc::unbounded_channel();

            self.bind(node.seed_addr(), Endpoint::Seed(seed_tx));
            self.bind(node.node_join_addr(), Endpoint::Push(join_tx));
            self.bind(node.node_depart_addr(), Endpoint::Push(depart_tx));
            self.bind(node.key_exchange_addr(), Endpoint::KeyExchange(key_tx));
            self.bind(node.changeset_addr(), Endpoint::Changeset(changeset_tx));
            self.bind(node.depart_done_addr(), Endpoint::Push(done_tx));
            self.bind(node.self_depart_addr(), Endpoint::Push(self_depart_tx));

            Ok(CoordinatorChannels {
                seed,
                node_join,
                node_depart,
                key_exchange,
                changeset,
                depart_done,
                self_depart,
            })
        }

        async fn client_request(
            &self,
            addr: &str,
            request: ClientRequest,
        ) -> NodeResult<ClientResponse> {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Client(tx) => tx
                    .send((request, reply_tx))
                    .map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })?;
            reply_rx.await.map_err(|_| NodeError::ChannelClosed)
        }

        fn send_gossip(&self, addr: &str, gossip: Gossip) -> NodeResult<()> {
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Gossip(tx) => tx.send(gossip).map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })
        }

        fn send_local_gossip(&self, addr: &str, batch: GossipBatch) -> NodeResult<()> {
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::LocalGossip(tx) => tx.send(batch).map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })
        }

        fn send_redistribute(&self, addr: &str, plan: RedistributePlan) -> NodeResult<()> {
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Redistribute(tx) => tx.send(plan).map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })
        }

        fn send_push(&self, addr: &str, message: String) -> NodeResult<()> {
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Push(tx) => tx.send(message).map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })
        }

        async fn seed_request(&self, addr: &str) -> NodeResult<String> {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Seed(tx) => tx.send(reply_tx).map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })?;
            reply_rx.await.map_err(|_| NodeError::ChannelClosed)
        }

        async fn key_request(&self, addr: &str, request: KeyRequest) -> NodeResult<KeyResponse> {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::KeyExchange(tx) => tx
                    .send((request, reply_tx))
                    .map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })?;
            reply_rx.await.map_err(|_| NodeError::ChannelClosed)
        }

        async fn changeset_request(
            &self,
            addr: &str,
            request: ChangesetRequest,
        ) -> NodeResult<ChangesetAddresses> {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.with_endpoint(addr, |endpoint| match endpoint {
                Endpoint::Changeset(tx) => tx
                    .send((request, reply_tx))
                    .map_err(|_| Self::closed(addr)),
                _ => Err(Self::mismatch(addr)),
            })?;
            reply_rx.await.map_err(|_| NodeError::ChannelClosed)
        }
    }
}
