#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sia_daemon::consensus::ConsensusSet;
use sia_daemon::gateway::Gateway;
use sia_daemon::miner::Miner;
use sia_daemon::tpool::TransactionPool;
use sia_daemon::wallet::Wallet;
use sia_common::crypto::Hash;
use tempdir::TempDir;

// A minimal in-process node: gateway, consensus, pool, wallet, miner. Each
// caller gets its own data dir and port so tests can run concurrently.
pub struct TestNode {
    pub dir: TempDir,
    pub gateway: Arc<Gateway>,
    pub consensus: Arc<ConsensusSet>,
    pub tpool: Arc<TransactionPool>,
    pub wallet: Arc<Wallet>,
    pub miner: Arc<Miner>,
}

pub async fn test_node(name: &str, port: u16) -> TestNode {
    let dir = TempDir::new(name).expect("temp dir");
    let data_dir = dir.path().to_string_lossy().to_string();

    let gateway = Gateway::new(&format!("127.0.0.1:{}", port), &data_dir).expect("gateway");
    gateway.start().await.expect("gateway listener");
    let consensus = ConsensusSet::new(Arc::clone(&gateway), &data_dir).expect("consensus");
    let tpool = TransactionPool::new(Arc::clone(&consensus), Arc::clone(&gateway));
    consensus
        .subscribe(
            Arc::clone(&tpool) as Arc<_>,
            sia_daemon::config::CONSENSUS_CHANGE_BEGINNING,
        )
        .await
        .expect("tpool subscription");

    let wallet = Wallet::new(
        Arc::clone(&consensus),
        Arc::clone(&tpool),
        &data_dir,
    )
    .expect("wallet");
    wallet.encrypt("testpass", Default::default()).await.expect("encrypt");
    wallet.unlock("testpass").await.expect("unlock");

    let miner = Miner::new(
        Arc::clone(&consensus),
        Arc::clone(&tpool),
        Arc::clone(&wallet),
    );

    consensus.set_synced(true);
    TestNode {
        dir,
        gateway,
        consensus,
        tpool,
        wallet,
        miner,
    }
}

pub async fn mine_blocks(node: &TestNode, count: usize) {
    for _ in 0..count {
        node.miner.find_block().await.expect("mine block");
    }
}

// Poll until `check` passes or the timeout elapses
pub async fn wait_for<F, Fut>(what: &str, timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub fn zero_hash() -> Hash {
    Hash::zero()
}
