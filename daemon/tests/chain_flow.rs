mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sia_common::config::{COIN_PRECISION, MAX_BLOCKS_REQUEST};
use sia_common::currency::Currency;
use sia_daemon::config::CONSENSUS_CHANGE_BEGINNING;
use sia_daemon::consensus::{block_subsidy, ConsensusChange, ConsensusSubscriber};
use sia_daemon::explorer::Explorer;
use tokio::sync::Mutex;

use common::{mine_blocks, test_node, wait_for};

fn subsidy_sum(from: u64, to: u64) -> Currency {
    let mut total = Currency::ZERO;
    for height in from..=to {
        total = total.checked_add(block_subsidy(height)).unwrap();
    }
    total
}

#[tokio::test]
async fn test_mining_grows_chain_and_wallet() {
    let node = test_node("chain-mining", 42101).await;

    mine_blocks(&node, 5).await;
    assert_eq!(node.consensus.height().await, 5);

    // payouts land on the wallet: the balance is exactly the subsidies
    wait_for("wallet to absorb payouts", Duration::from_secs(10), || {
        let wallet = Arc::clone(&node.wallet);
        async move { wallet.confirmed_balance().await.0 == subsidy_sum(1, 5) }
    })
    .await;

    let (mined, stale) = node.miner.blocks_mined();
    assert_eq!(mined, 5);
    assert_eq!(stale, 0);
}

#[tokio::test]
async fn test_send_and_confirm_cycle() {
    let node = test_node("chain-send", 42102).await;
    mine_blocks(&node, 3).await;
    wait_for("initial balance", Duration::from_secs(10), || {
        let wallet = Arc::clone(&node.wallet);
        async move { !wallet.confirmed_balance().await.0.is_zero() }
    })
    .await;

    let destination = node.wallet.next_address().await.unwrap().unlock_hash();
    let sent = node
        .wallet
        .send_siacoins(Currency::from_coins(1_000), destination)
        .await
        .unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(node.tpool.transaction_count().await, 1);

    // confirming the transaction empties the pool in the same tick
    mine_blocks(&node, 1).await;
    wait_for("pool to drain", Duration::from_secs(10), || {
        let tpool = Arc::clone(&node.tpool);
        async move { tpool.transaction_count().await == 0 }
    })
    .await;

    // the fee comes straight back as part of our own block payout, so the
    // balance is again exactly the subsidies
    wait_for("post-confirmation balance", Duration::from_secs(10), || {
        let wallet = Arc::clone(&node.wallet);
        async move { wallet.confirmed_balance().await.0 == subsidy_sum(1, 4) }
    })
    .await;

    let confirmed = node.wallet.transactions(0, u64::MAX).await.unwrap();
    assert!(confirmed
        .iter()
        .any(|txn| txn.transaction_id == sent[0].id()));
}

struct RecordingSubscriber {
    changes: Mutex<Vec<Arc<ConsensusChange>>>,
}

#[async_trait]
impl ConsensusSubscriber for RecordingSubscriber {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn process_consensus_change(&self, change: Arc<ConsensusChange>) {
        self.changes.lock().await.push(change);
    }
}

#[tokio::test]
async fn test_subscriber_replay_matches_canonical_chain() {
    let node = test_node("chain-replay", 42103).await;
    mine_blocks(&node, 6).await;

    // a late subscriber catches up from genesis and sees a gap-free stream
    let recorder = Arc::new(RecordingSubscriber {
        changes: Mutex::new(Vec::new()),
    });
    node.consensus
        .subscribe(Arc::clone(&recorder) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
        .await
        .unwrap();

    wait_for("catch-up delivery", Duration::from_secs(10), || {
        let recorder = Arc::clone(&recorder);
        async move {
            let changes = recorder.changes.lock().await;
            changes.iter().map(|c| c.applied_blocks.len()).sum::<usize>() >= 7
        }
    })
    .await;

    // replaying applied \ reverted reproduces the canonical ordering
    let mut replayed = Vec::new();
    {
        let changes = recorder.changes.lock().await;
        let mut prev = CONSENSUS_CHANGE_BEGINNING;
        for change in changes.iter() {
            assert_eq!(change.prev, prev, "stream has a gap");
            prev = change.id.clone();
            for block in &change.reverted_blocks {
                assert_eq!(replayed.pop(), Some(block.id()));
            }
            for block in &change.applied_blocks {
                replayed.push(block.id());
            }
        }
    }

    let mut canonical = Vec::new();
    for height in 0..=node.consensus.height().await {
        canonical.push(node.consensus.block_at_height(height).await.unwrap().id());
    }
    assert_eq!(replayed, canonical);
}

#[tokio::test]
async fn test_consensus_change_walk() {
    let node = test_node("chain-walk", 42104).await;
    mine_blocks(&node, 4).await;

    // random access over the durable log, following next pointers
    let mut cursor = CONSENSUS_CHANGE_BEGINNING;
    let mut applied = 0usize;
    loop {
        let (change, next) = node.consensus.get_consensus_change(&cursor).unwrap();
        applied += change.applied_blocks.len();
        match next {
            Some(next) => cursor = next,
            None => {
                assert_eq!(change.id, cursor);
                break;
            }
        }
    }
    assert_eq!(applied, 5); // genesis + 4 mined
}

#[tokio::test]
async fn test_explorer_tracks_chain() {
    let node = test_node("chain-explorer", 42105).await;
    let data_dir = node.dir.path().to_string_lossy().to_string();
    let explorer = Explorer::new(Arc::clone(&node.consensus), &data_dir).unwrap();
    node.consensus
        .subscribe(Arc::clone(&explorer) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
        .await
        .unwrap();

    mine_blocks(&node, 3).await;
    wait_for("explorer ingestion", Duration::from_secs(10), || {
        let explorer = Arc::clone(&explorer);
        async move { explorer.height().await == 3 }
    })
    .await;

    let facts = explorer.latest_facts().await;
    assert_eq!(facts.height, 3);
    assert_eq!(facts.miner_payout_count, 3);
    assert!(facts.total_coins >= Currency::new(COIN_PRECISION));

    let tip = node.consensus.current_tip().await;
    assert_eq!(
        explorer.hash_type(&tip).unwrap(),
        sia_common::api::explorer::HashType::BlockId
    );

    let block = explorer.block_at(2).unwrap();
    assert_eq!(block.id(), node.consensus.block_at_height(2).await.unwrap().id());
}

#[tokio::test]
async fn test_blocks_after_respects_batch_ceiling() {
    let node = test_node("chain-batch", 42106).await;
    mine_blocks(&node, (MAX_BLOCKS_REQUEST + 5) as usize).await;

    let (blocks, more) = node.consensus.blocks_after(vec![]).await;
    assert_eq!(blocks.len(), MAX_BLOCKS_REQUEST as usize);
    assert!(more);

    let (rest, more) = node
        .consensus
        .blocks_after(vec![blocks.last().unwrap().id()])
        .await;
    assert!(!rest.is_empty());
    assert!(!more);
}
