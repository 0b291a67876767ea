mod common;

use std::sync::Arc;
use std::time::Duration;

use sia_daemon::config::NodeConfig;
use sia_daemon::node::Node;
use tempdir::TempDir;

use common::wait_for;

use clap::Parser;

async fn full_node(name: &str, rpc_port: u16) -> (TempDir, Arc<Node>) {
    let dir = TempDir::new(name).expect("temp dir");
    let config = NodeConfig::parse_from([
        "siad",
        "--rpc-addr",
        &format!("127.0.0.1:{}", rpc_port),
        "--host-addr",
        &format!("127.0.0.1:{}", rpc_port + 1),
        "--data-dir",
        &dir.path().to_string_lossy(),
        "--modules",
        "gctwm",
        "--no-bootstrap",
    ]);
    let node = Node::start(config).await.expect("node start");
    let wallet = node.wallet.as_ref().expect("wallet module");
    wallet
        .encrypt("pass", Default::default())
        .await
        .expect("encrypt");
    wallet.unlock("pass").await.expect("unlock");
    (dir, node)
}

async fn mine(node: &Node, count: usize) {
    let miner = node.miner.as_ref().expect("miner module");
    for _ in 0..count {
        miner.find_block().await.expect("mine");
    }
}

// Two nodes mine independently, connect, and must converge on the heavier
// chain with identical tips.
#[tokio::test]
async fn test_independent_nodes_converge_after_connect() {
    let (_dir_a, node_a) = full_node("sync-a", 42301).await;
    let (_dir_b, node_b) = full_node("sync-b", 42303).await;

    mine(&node_a, 5).await;
    mine(&node_b, 3).await;

    let consensus_a = node_a.consensus.as_ref().unwrap();
    let consensus_b = node_b.consensus.as_ref().unwrap();
    assert_ne!(consensus_a.current_tip().await, consensus_b.current_tip().await);

    node_a
        .gateway
        .as_ref()
        .unwrap()
        .connect("127.0.0.1:42303")
        .await
        .expect("connect");

    // a fresh block floods to the shorter chain, which synchronizes and
    // reorganizes onto the longer one
    mine(&node_a, 1).await;

    wait_for("chains to converge", Duration::from_secs(30), || {
        let a = Arc::clone(consensus_a);
        let b = Arc::clone(consensus_b);
        async move { a.current_tip().await == b.current_tip().await }
    })
    .await;

    assert_eq!(consensus_a.height().await, 6);
    assert_eq!(consensus_b.height().await, 6);

    node_a.stop().await;
    node_b.stop().await;
}

// A dynamic-address host keeps its identity across re-announcements: the
// pubkey stays, the net address moves.
#[tokio::test]
async fn test_gateway_peer_listing() {
    let (_dir_a, node_a) = full_node("peers-a", 42311).await;
    let (_dir_b, node_b) = full_node("peers-b", 42313).await;

    node_a
        .gateway
        .as_ref()
        .unwrap()
        .connect("127.0.0.1:42313")
        .await
        .expect("connect");

    wait_for("peer registration", Duration::from_secs(10), || {
        let gateway = Arc::clone(node_b.gateway.as_ref().unwrap());
        async move { gateway.peer_count().await == 1 }
    })
    .await;

    let peers = node_a.gateway.as_ref().unwrap().peers_info().await;
    assert_eq!(peers.len(), 1);
    assert!(!peers[0].inbound);
    assert_eq!(peers[0].net_address, "127.0.0.1:42313");

    let peers = node_b.gateway.as_ref().unwrap().peers_info().await;
    assert_eq!(peers.len(), 1);
    assert!(peers[0].inbound);

    node_a
        .gateway
        .as_ref()
        .unwrap()
        .disconnect("127.0.0.1:42313")
        .await
        .expect("disconnect");
    assert_eq!(node_a.gateway.as_ref().unwrap().peer_count().await, 0);

    node_a.stop().await;
    node_b.stop().await;
}
