use driftkv_types::{NodeId, WorkerId, GOSSIP_PORT_OFFSET, SERVER_PORT};

#[test]
fn node_endpoints_use_well_known_ports() {
    let node = NodeId::new("10.0.0.7");
    assert_eq!(node.seed_addr(), "tcp://10.0.0.7:6400");
    assert_eq!(node.node_join_addr(), "tcp://10.0.0.7:6401");
    assert_eq!(node.node_depart_addr(), "tcp://10.0.0.7:6402");
    assert_eq!(node.key_exchange_addr(), "tcp://10.0.0.7:6403");
    assert_eq!(node.changeset_addr(), "tcp://10.0.0.7:6404");
    assert_eq!(node.depart_done_addr(), "tcp://10.0.0.7:6405");
    assert_eq!(node.self_depart_addr(), "tcp://10.0.0.7:6406");
    assert_eq!(node.client_notify_addr(), "tcp://10.0.0.7:6410");
}

#[test]
fn worker_client_port_offsets_by_index() {
    let w = WorkerId::new("10.0.0.7", 3);
    assert_eq!(w.id(), format!("10.0.0.7:{}", SERVER_PORT + 3));
    assert_eq!(w.client_addr(), format!("tcp://10.0.0.7:{}", SERVER_PORT + 3));
}

#[test]
fn worker_gossip_port_offsets_by_a_hundred() {
    let w = WorkerId::new("10.0.0.7", 2);
    assert_eq!(
        w.gossip_addr(),
        format!("tcp://10.0.0.7:{}", SERVER_PORT + GOSSIP_PORT_OFFSET + 2)
    );
}

#[test]
fn worker_inproc_endpoints() {
    let w = WorkerId::new("192.168.1.4", 1);
    assert_eq!(w.local_gossip_addr(), "inproc://192.168.1.4:1/lgossip");
    assert_eq!(w.redistribute_addr(), "inproc://192.168.1.4:1/lredist");
    assert_eq!(w.depart_addr(), "inproc://192.168.1.4:1/ldepart");
}

#[test]
fn worker_address_roundtrip() {
    let w = WorkerId::new("10.0.0.7", 5);
    let parsed = WorkerId::from_address(&w.id()).unwrap();
    assert_eq!(parsed, w);
    assert_eq!(parsed.index(), 5);
    assert_eq!(parsed.ip(), "10.0.0.7");
}

#[test]
fn worker_address_rejects_garbage() {
    assert!(WorkerId::from_address("no-port-here").is_err());
    assert!(WorkerId::from_address("10.0.0.7:notaport").is_err());
    // Ports below the server base cannot name a worker.
    assert!(WorkerId::from_address("10.0.0.7:80").is_err());
}

#[test]
fn display_matches_canonical_id() {
    let w = WorkerId::new("10.0.0.7", 1);
    assert_eq!(w.to_string(), w.id());
    assert_eq!(NodeId::new("10.0.0.7").to_string(), "10.0.0.7");
}
