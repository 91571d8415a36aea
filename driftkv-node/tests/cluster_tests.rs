//! Multi-node scenarios over the in-process transport: LWW convergence,
//! join redistribution, and clean self-departure.

mod common;

use common::{converged, eventually, get, put, resolve, test_config};
use driftkv_node::{start, Bootstrap, InProcTransport, NodeHandle, NoopVolumes, Transport};
use driftkv_ring::{placement, GlobalRing};
use driftkv_types::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const NODE_A: &str = "10.2.0.1";
const NODE_B: &str = "10.2.0.2";
const NODE_C: &str = "10.2.0.3";
const CLIENT: &str = "10.8.0.9";

async fn start_seeded(
    transport: &Arc<InProcTransport>,
    tmp: &TempDir,
    ip: &str,
    seeds: &[&str],
    clients: &[&str],
) -> NodeHandle {
    start(
        test_config(ip, tmp.path()),
        Bootstrap::Seeds(seeds.iter().map(|s| s.to_string()).collect()),
        clients.iter().map(|s| s.to_string()).collect(),
        Arc::clone(transport) as Arc<dyn Transport>,
        Arc::new(NoopVolumes),
    )
    .await
    .unwrap()
}

// ── Scenario: LWW on two writers ─────────────────────────────────

#[tokio::test]
async fn two_writers_converge_on_the_last_write() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _a = start_seeded(&transport, &tmp, NODE_A, &[NODE_B], &[]).await;
    let _b = start_seeded(&transport, &tmp, NODE_B, &[NODE_A], &[]).await;

    // First write lands at node A and replicates everywhere.
    let writers_a = resolve(&transport, NODE_A, "k").await;
    assert!(put(&transport, &writers_a[0], "k", b"v1").await);
    eventually!(
        converged(&transport, NODE_A, "k", b"v1").await
            && converged(&transport, NODE_B, "k", b"v1").await,
        "v1 to reach every replica"
    );

    // A later write at node B supersedes it on every replica of both nodes.
    let writers_b = resolve(&transport, NODE_B, "k").await;
    assert!(put(&transport, &writers_b[0], "k", b"v2").await);
    eventually!(
        converged(&transport, NODE_A, "k", b"v2").await
            && converged(&transport, NODE_B, "k", b"v2").await,
        "v2 to supersede v1 everywhere"
    );
}

// ── Scenario: join redistribution ────────────────────────────────

#[tokio::test]
async fn joining_node_receives_rotated_keys_and_the_dropped_replica_deletes() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _a = start_seeded(&transport, &tmp, NODE_A, &[NODE_B], &[]).await;
    let _b = start_seeded(&transport, &tmp, NODE_B, &[NODE_A], &[]).await;

    // Pick a key that will rotate onto C once it joins: C must enter the
    // replica set, displacing one of the current holders.
    let mut future_ring = GlobalRing::new();
    for ip in [NODE_A, NODE_B, NODE_C] {
        future_ring.insert(NodeId::new(ip));
    }
    let (key, dropped) = (0..100)
        .find_map(|i| {
            let key = format!("key-{i}");
            let p = placement(&future_ring, &key, 2, NODE_C);
            let dropped = p.handoff_peer?;
            p.is_responsible.then(|| (key, dropped.ip().to_string()))
        })
        .expect("some key rotates onto the joiner");

    // Seed the key through A and let it converge on both holders.
    let writers = resolve(&transport, NODE_A, &key).await;
    assert!(put(&transport, &writers[0], &key, b"rotating").await);
    eventually!(
        converged(&transport, NODE_A, &key, b"rotating").await
            && converged(&transport, NODE_B, &key, b"rotating").await,
        "the key to replicate before the join"
    );
    let dropped_replicas = resolve(&transport, &dropped, &key).await;

    // C joins through A and announces itself.
    let _c = start(
        test_config(NODE_C, tmp.path()),
        Bootstrap::Join {
            seed_ip: NODE_A.to_string(),
        },
        Vec::new(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(NoopVolumes),
    )
    .await
    .unwrap();

    // The rotated key arrives at C's replicas via gossip from the canonical
    // sender.
    eventually!(
        converged(&transport, NODE_C, &key, b"rotating").await,
        "the joiner to receive the rotated key"
    );

    // The displaced holder dropped its copies after the hand-off.
    eventually!(
        async {
            for addr in &dropped_replicas {
                if get(&transport, addr, &key).await.is_some() {
                    return false;
                }
            }
            true
        }
        .await,
        "the displaced replica to delete its copies"
    );
}

#[tokio::test]
async fn late_joiner_receives_existing_keys_without_deletion() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let _a = start_seeded(&transport, &tmp, NODE_A, &[], &[]).await;

    let writers = resolve(&transport, NODE_A, "k").await;
    assert!(put(&transport, &writers[0], "k", b"v").await);
    eventually!(
        converged(&transport, NODE_A, "k", b"v").await,
        "the singleton node to settle"
    );

    // B joins; with the ring no larger than the replication factor the
    // sender replicates without dropping its own copy.
    let _b = start(
        test_config(NODE_B, tmp.path()),
        Bootstrap::Join {
            seed_ip: NODE_A.to_string(),
        },
        Vec::new(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(NoopVolumes),
    )
    .await
    .unwrap();

    eventually!(
        converged(&transport, NODE_B, "k", b"v").await,
        "the late joiner to receive the key"
    );
    assert!(converged(&transport, NODE_A, "k", b"v").await);
}

// ── Scenario: self-depart ────────────────────────────────────────

#[tokio::test]
async fn self_depart_notifies_clients_and_preserves_replication() {
    let transport = Arc::new(InProcTransport::new());
    let tmp = TempDir::new().unwrap();
    let mut notifications = transport.bind_push(&NodeId::new(CLIENT).client_notify_addr());

    let a = start_seeded(&transport, &tmp, NODE_A, &[NODE_B, NODE_C], &[CLIENT]).await;
    let _b = start_seeded(&transport, &tmp, NODE_B, &[NODE_A, NODE_C], &[CLIENT]).await;
    let _c = start_seeded(&transport, &tmp, NODE_C, &[NODE_A, NODE_B], &[CLIENT]).await;

    // Each node announced itself to the client on startup.
    for _ in 0..3 {
        let notice = notifications.recv().await.unwrap();
        assert!(notice.starts_with("join:"));
    }

    // Two keys written through A, converged across the cluster.
    for key in ["alpha", "beta"] {
        let writers = resolve(&transport, NODE_A, key).await;
        assert!(put(&transport, &writers[0], key, b"held").await);
        eventually!(
            converged(&transport, NODE_A, key, b"held").await,
            "writes to settle before the depart"
        );
    }
    // Let the gossip fan-out to the responsible peers quiesce.
    tokio::time::sleep(Duration::from_millis(200)).await;

    a.self_depart().unwrap();
    tokio::time::timeout(Duration::from_secs(5), a.wait())
        .await
        .expect("node A to drain and terminate");

    // Every client hears about the departure.
    eventually!(
        matches!(notifications.try_recv(), Ok(notice) if notice == format!("depart:{NODE_A}")),
        "the depart notification"
    );

    // Both keys survive at full replication on the remaining nodes.
    for key in ["alpha", "beta"] {
        eventually!(
            converged(&transport, NODE_B, key, b"held").await
                && converged(&transport, NODE_C, key, b"held").await,
            "replication to be preserved after the depart"
        );
    }
}
