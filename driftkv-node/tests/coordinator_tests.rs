mod common;

use common::{converged, eventually, get, put, resolve, test_config, RecordingVolumes};
use driftkv_node::protocol::ChangesetRequest;
use driftkv_node::{start, Bootstrap, InProcTransport, NoopVolumes, Transport, VolumeManager};
use driftkv_types::{NodeId, WorkerId, SERVER_PORT};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

const NODE_A: &str = "10.1.0.1";
const NODE_B: &str = "10.1.0.2";

async fn start_node(
    transport: &Arc<InProcTransport>,
    tmp: &TempDir,
    ip: &str,
    seeds: &[&str],
) -> driftkv_node::NodeHandle {
    start(
        test_config(ip, tmp.path()),
        Bootstrap::Seeds(seeds.iter().map(|s| s.to_string()).collect()),
        Vec::new(),
        Arc::clone(transport) as Arc<dyn Transport>,
        Arc::new(NoopVolumes),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn seed_request_lists_all_members() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _node = start_node(&transport, &tmp, NODE_A, &[NODE_B]).await;

    let members = transport
        .seed_request(&NodeId::new(NODE_A).seed_addr())
        .await
        .unwrap();
    let members: HashSet<&str> = members.split('|').collect();
    assert_eq!(members, HashSet::from([NODE_A, NODE_B]));
}

#[tokio::test]
async fn key_request_returns_local_replica_workers() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _node = start_node(&transport, &tmp, NODE_A, &[]).await;

    let addresses = resolve(&transport, NODE_A, "some-key").await;
    assert_eq!(addresses.len(), 2); // local_replication

    let unique: HashSet<&String> = addresses.iter().collect();
    assert_eq!(unique.len(), 2);
    for addr in &addresses {
        let worker = WorkerId::from_address(addr).unwrap();
        assert_eq!(worker.ip(), NODE_A);
        assert!((1..=3).contains(&worker.index()));
    }
}

#[tokio::test]
async fn key_request_is_stable_across_queries() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _node = start_node(&transport, &tmp, NODE_A, &[]).await;

    let first = resolve(&transport, NODE_A, "pinned").await;
    let second = resolve(&transport, NODE_A, "pinned").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn changeset_request_excludes_the_requester() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _node = start_node(&transport, &tmp, NODE_A, &[]).await;

    // Ask on behalf of a worker that replicates the key.
    let replicas = resolve(&transport, NODE_A, "k").await;
    let requester = WorkerId::from_address(&replicas[0]).unwrap();

    let request = ChangesetRequest {
        origin_port: SERVER_PORT + requester.index() as u16,
        keys: HashSet::from(["k".to_string()]),
        local_only: true,
    };
    let addresses = transport
        .changeset_request(&NodeId::new(NODE_A).changeset_addr(), request)
        .await
        .unwrap();

    assert!(!addresses.contains_key(&requester.id()));
    for (addr, keys) in &addresses {
        assert_eq!(WorkerId::from_address(addr).unwrap().ip(), NODE_A);
        assert!(keys.contains("k"));
    }
}

#[tokio::test]
async fn changeset_request_resolves_remote_replicas() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _a = start_node(&transport, &tmp, NODE_A, &[NODE_B]).await;
    let _b = start_node(&transport, &tmp, NODE_B, &[NODE_A]).await;

    let request = ChangesetRequest {
        origin_port: SERVER_PORT + 1,
        keys: HashSet::from(["k".to_string()]),
        local_only: false,
    };
    let addresses = transport
        .changeset_request(&NodeId::new(NODE_A).changeset_addr(), request)
        .await
        .unwrap();

    // With two nodes and a global factor of two, the other node's workers
    // are always part of the resolution.
    let ips: HashSet<String> = addresses
        .keys()
        .map(|addr| WorkerId::from_address(addr).unwrap().ip().to_string())
        .collect();
    assert!(ips.contains(NODE_B), "remote replicas missing: {addresses:?}");
}

#[tokio::test]
async fn local_only_resolution_stays_on_the_node() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _a = start_node(&transport, &tmp, NODE_A, &[NODE_B]).await;
    let _b = start_node(&transport, &tmp, NODE_B, &[NODE_A]).await;

    let request = ChangesetRequest {
        origin_port: SERVER_PORT + 1,
        keys: HashSet::from(["k".to_string()]),
        local_only: true,
    };
    let addresses = transport
        .changeset_request(&NodeId::new(NODE_A).changeset_addr(), request)
        .await
        .unwrap();

    for addr in addresses.keys() {
        assert_eq!(WorkerId::from_address(addr).unwrap().ip(), NODE_A);
    }
}

#[tokio::test]
async fn removed_workers_device_is_recycled_by_the_next_add() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let volumes = Arc::new(RecordingVolumes::default());

    let node = start(
        test_config(NODE_A, tmp.path()),
        Bootstrap::Seeds(Vec::new()),
        Vec::new(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&volumes) as Arc<dyn VolumeManager>,
    )
    .await
    .unwrap();

    // The initial pool attaches devices in order.
    assert_eq!(
        volumes.attached(),
        vec![
            ("ba".to_string(), 1),
            ("bb".to_string(), 2),
            ("bc".to_string(), 3)
        ]
    );

    // Removing the highest-indexed worker frees its device slot...
    node.remove_worker().unwrap();
    eventually!(
        volumes.detached() == vec![("bc".to_string(), 3)],
        "worker 3 to detach its volume"
    );

    // ...and the freed slot wins over minting a new name.
    node.add_worker().unwrap();
    eventually!(
        volumes.attached().contains(&("bc".to_string(), 4)),
        "the freed device to be reused"
    );
}

#[tokio::test]
async fn worker_add_repartitions_placed_keys() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let node = start_node(&transport, &tmp, NODE_A, &[]).await;

    let keys: Vec<String> = (0..10).map(|i| format!("key-{i}")).collect();
    for key in &keys {
        let writers = resolve(&transport, NODE_A, key).await;
        assert!(put(&transport, &writers[0], key, b"placed").await);
        eventually!(
            converged(&transport, NODE_A, key, b"placed").await,
            "writes to settle before the worker add"
        );
    }

    // Growing the local ring reshuffles ownership; the hand-off sources
    // stream each rotated key to the newcomer, so every key stays served
    // by its (new) replica set.
    node.add_worker().unwrap();
    for key in &keys {
        eventually!(
            converged(&transport, NODE_A, key, b"placed").await,
            "keys to follow the local ring after the add"
        );
    }
}

#[tokio::test]
async fn added_worker_serves_requests() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let node = start_node(&transport, &tmp, NODE_A, &[]).await;

    node.add_worker().unwrap();

    // The new worker (index 4) comes up with live endpoints.
    let worker = WorkerId::new(NODE_A, 4);
    eventually!(
        put(&transport, &worker.id(), "probe", b"v").await,
        "worker 4 to serve requests"
    );
    assert_eq!(get(&transport, &worker.id(), "probe").await, Some(b"v".to_vec()));
}
