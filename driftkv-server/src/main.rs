//! DriftKV storage node.
//!
//! One process per cluster node: a coordinator plus a pool of storage
//! workers. Usage:
//!
//!   driftkv-server <new_node: y|n> <enable_ebs: y|n>
//!
//! `new_node=y` joins through the configured seed server and announces
//! itself to the cluster; `new_node=n` seeds the global ring straight from
//! `conf/server/start_servers.txt`. `enable_ebs=y` drives the real volume
//! attach/detach scripts; `n` uses no-op volumes.

use anyhow::Result;
use clap::Parser;
use driftkv_node::{
    config, start, Bootstrap, InProcTransport, NodeConfig, NoopVolumes, ShellVolumes,
    VolumeManager,
};
use std::net::UdpSocket;
use std::path::Path;
use std::process::exit;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "driftkv-server")]
#[command(about = "DriftKV storage node")]
struct Args {
    /// Whether this node is newly joining the cluster (y|n)
    new_node: String,

    /// Whether backing volumes are managed by the EBS scripts (y|n)
    enable_ebs: String,
}

fn usage_exit() -> ! {
    eprintln!("usage: driftkv-server <new_node: y|n> <enable_ebs: y|n>");
    exit(1);
}

fn parse_flag(value: &str) -> bool {
    match value {
        "y" => true,
        "n" => false,
        other => {
            eprintln!("Invalid argument: {other}.");
            usage_exit();
        }
    }
}

/// Determines the IP this node is reachable at, by the routing table's
/// choice of outbound interface. No packets are sent.
fn local_ip() -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::try_parse().unwrap_or_else(|_| usage_exit());
    let new_node = parse_flag(&args.new_node);
    let enable_ebs = parse_flag(&args.enable_ebs);

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let base = Path::new(".");
    let client_addresses = config::load_client_addresses(base)?;
    let ebs_root = config::load_ebs_root(base)?;
    let bootstrap = if new_node {
        Bootstrap::Join {
            seed_ip: config::load_seed_server(base)?,
        }
    } else {
        Bootstrap::Seeds(config::load_start_servers(base)?)
    };

    let node_config = NodeConfig {
        ip: local_ip()?,
        ebs_root,
        ..NodeConfig::default()
    };
    info!(ip = %node_config.ip, new_node, enable_ebs, "DriftKV node starting");

    let volumes: Arc<dyn VolumeManager> = if enable_ebs {
        Arc::new(ShellVolumes)
    } else {
        Arc::new(NoopVolumes)
    };
    let transport = Arc::new(InProcTransport::new());

    let handle = start(
        node_config,
        bootstrap,
        client_addresses,
        transport,
        volumes,
    )
    .await?;

    // A SIGINT triggers the same clean departure an operator command would.
    let controller = handle.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; departing cleanly");
            if let Err(err) = controller.self_depart() {
                warn!(%err, "self-depart command lost");
            }
        }
    });

    handle.wait().await;
    info!("node terminated");
    Ok(())
}
