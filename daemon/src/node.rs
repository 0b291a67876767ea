use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sia_common::block::Block;
use sia_common::crypto::Hash;
use sia_common::transaction::Transaction;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::{NodeConfig, CONSENSUS_CHANGE_BEGINNING, SHUTDOWN_MODULE_TIMEOUT_SECS};
use crate::consensus::{ConsensusError, ConsensusSet};
use crate::explorer::Explorer;
use crate::gateway::{Gateway, RelayHandler};
use crate::host::Host;
use crate::miner::Miner;
use crate::renter::Renter;
use crate::tpool::TransactionPool;
use crate::wallet::Wallet;

// Routes inbound gateway traffic upward without the gateway holding module
// handles: blocks to consensus (with banning on permanent invalidity),
// transaction sets to the pool, block requests back out of consensus.
struct NodeRelay {
    consensus: Arc<ConsensusSet>,
    tpool: Option<Arc<TransactionPool>>,
}

#[async_trait]
impl RelayHandler for NodeRelay {
    async fn block_received(&self, block: Block, from: String) {
        let gateway = Arc::clone(self.consensus.gateway());
        match self.consensus.accept_block(block.clone()).await {
            Ok(()) => {
                // extend the flood
                gateway.broadcast_block(block).await;
            }
            Err(ConsensusError::Orphan) => {
                // the peer is ahead of us; catch up from it
                debug!("Orphan block from {}, synchronizing", from);
                let consensus = Arc::clone(&self.consensus);
                tokio::spawn(async move {
                    if let Err(e) = consensus.synchronize(Some(&from)).await {
                        debug!("Synchronization with {} failed: {}", from, e);
                    }
                });
            }
            Err(ConsensusError::BlockKnown)
            | Err(ConsensusError::NonExtending)
            | Err(ConsensusError::FutureTimestamp) => {}
            Err(e) => {
                // permanently invalid blocks get the peer banned
                warn!("Invalid block from {}: {}", from, e);
                gateway.ban(&from).await;
            }
        }
    }

    async fn transaction_set_received(&self, set: Vec<Transaction>, from: String) {
        if let Some(tpool) = &self.tpool {
            if let Err(e) = tpool.accept_transaction_set(set).await {
                debug!("Transaction set from {} rejected: {}", from, e);
            }
        }
    }

    async fn blocks_requested(&self, known: Vec<Hash>) -> (Vec<Block>, bool) {
        self.consensus.blocks_after(known).await
    }
}

// The assembled node: every loaded module plus the shutdown signal. Modules
// come up in dependency order and go down in reverse.
pub struct Node {
    pub config: NodeConfig,
    pub gateway: Option<Arc<Gateway>>,
    pub consensus: Option<Arc<ConsensusSet>>,
    pub tpool: Option<Arc<TransactionPool>>,
    pub wallet: Option<Arc<Wallet>>,
    pub host: Option<Arc<Host>>,
    pub renter: Option<Arc<Renter>>,
    pub miner: Option<Arc<Miner>>,
    pub explorer: Option<Arc<Explorer>>,
    shutdown: broadcast::Sender<()>,
}

impl Node {
    pub async fn start(config: NodeConfig) -> Result<Arc<Node>> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("could not create data dir {}", config.data_dir))?;

        let (shutdown, _) = broadcast::channel(4);

        let gateway = if config.has_module('g') {
            let gateway = Gateway::new(&config.rpc_addr, &config.data_dir)?;
            gateway.start().await?;
            Some(gateway)
        } else {
            None
        };

        let consensus = if config.has_module('c') {
            let gateway = gateway
                .clone()
                .ok_or_else(|| anyhow!("consensus requires the gateway module"))?;
            Some(ConsensusSet::new(gateway, &config.data_dir)?)
        } else {
            None
        };

        let tpool = if config.has_module('t') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("transaction pool requires the consensus module"))?;
            let gateway = gateway.clone().expect("consensus implies gateway");
            let tpool = TransactionPool::new(Arc::clone(&consensus), gateway);
            consensus
                .subscribe(Arc::clone(&tpool) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
                .await?;
            Some(tpool)
        } else {
            None
        };

        let wallet = if config.has_module('w') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("wallet requires the consensus module"))?;
            let tpool = tpool
                .clone()
                .ok_or_else(|| anyhow!("wallet requires the transaction pool module"))?;
            // the wallet registers its subscriptions on first unlock
            Some(Wallet::new(consensus, tpool, &config.data_dir)?)
        } else {
            None
        };

        let host = if config.has_module('h') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("host requires the consensus module"))?;
            let tpool = tpool
                .clone()
                .ok_or_else(|| anyhow!("host requires the transaction pool module"))?;
            let wallet = wallet
                .clone()
                .ok_or_else(|| anyhow!("host requires the wallet module"))?;
            let host = Host::new(
                Arc::clone(&consensus),
                tpool,
                wallet,
                &config.host_addr,
                &config.data_dir,
            )?;
            consensus
                .subscribe(Arc::clone(&host) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
                .await?;
            host.start().await?;
            Some(host)
        } else {
            None
        };

        let renter = if config.has_module('r') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("renter requires the consensus module"))?;
            let tpool = tpool
                .clone()
                .ok_or_else(|| anyhow!("renter requires the transaction pool module"))?;
            let wallet = wallet
                .clone()
                .ok_or_else(|| anyhow!("renter requires the wallet module"))?;
            let renter = Renter::new(Arc::clone(&consensus), tpool, wallet, &config.data_dir)?;
            consensus
                .subscribe(
                    Arc::clone(&renter.hostdb) as Arc<_>,
                    CONSENSUS_CHANGE_BEGINNING,
                )
                .await?;
            consensus
                .subscribe(Arc::clone(&renter) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
                .await?;
            renter.start().await;
            Some(renter)
        } else {
            None
        };

        let miner = if config.has_module('m') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("miner requires the consensus module"))?;
            let tpool = tpool
                .clone()
                .ok_or_else(|| anyhow!("miner requires the transaction pool module"))?;
            let wallet = wallet
                .clone()
                .ok_or_else(|| anyhow!("miner requires the wallet module"))?;
            Some(Miner::new(consensus, tpool, wallet))
        } else {
            None
        };

        let explorer = if config.has_module('e') {
            let consensus = consensus
                .clone()
                .ok_or_else(|| anyhow!("explorer requires the consensus module"))?;
            let explorer = Explorer::new(Arc::clone(&consensus), &config.data_dir)?;
            consensus
                .subscribe(Arc::clone(&explorer) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
                .await?;
            Some(explorer)
        } else {
            None
        };

        // wire inbound traffic now that the receiving modules exist
        if let (Some(gateway), Some(consensus)) = (&gateway, &consensus) {
            gateway
                .set_handler(Arc::new(NodeRelay {
                    consensus: Arc::clone(consensus),
                    tpool: tpool.clone(),
                }))
                .await;

            if config.no_bootstrap {
                consensus.set_synced(true);
            } else {
                let gateway = Arc::clone(gateway);
                let consensus = Arc::clone(consensus);
                tokio::spawn(async move {
                    gateway.bootstrap().await;
                    if gateway.peer_count().await == 0 {
                        // nobody to sync from; we are our own best tip
                        consensus.set_synced(true);
                        return;
                    }
                    if let Err(e) = consensus.synchronize(None).await {
                        warn!("Initial synchronization failed: {}", e);
                    }
                });
            }
        }

        info!("Node started with modules [{}]", config.modules);
        Ok(Arc::new(Node {
            config,
            gateway,
            consensus,
            tpool,
            wallet,
            host,
            renter,
            miner,
            explorer,
            shutdown,
        }))
    }

    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
            }
        }
    }

    // Close modules in reverse dependency order. A module that cannot close
    // within the sweep timeout is reported deadlocked and left behind.
    pub async fn stop(&self) {
        info!("Shutting down modules...");

        if let Some(explorer) = &self.explorer {
            Self::close_module("explorer", explorer.close()).await;
        }
        if let Some(miner) = &self.miner {
            Self::close_module("miner", async {
                miner.close().await;
                Ok::<(), std::convert::Infallible>(())
            })
            .await;
        }
        if let Some(renter) = &self.renter {
            Self::close_module("renter", renter.close()).await;
        }
        if let Some(host) = &self.host {
            Self::close_module("host", host.close()).await;
        }
        if let Some(wallet) = &self.wallet {
            Self::close_module("wallet", wallet.close()).await;
        }
        if let Some(consensus) = &self.consensus {
            Self::close_module("consensus", consensus.close()).await;
        }
        if let Some(gateway) = &self.gateway {
            Self::close_module("gateway", async {
                gateway.close().await;
                Ok::<(), std::convert::Infallible>(())
            })
            .await;
        }

        info!("Shutdown complete");
    }

    async fn close_module<E: std::fmt::Display>(
        name: &str,
        close: impl std::future::Future<Output = Result<(), E>>,
    ) {
        match timeout(Duration::from_secs(SHUTDOWN_MODULE_TIMEOUT_SECS), close).await {
            Ok(Ok(())) => debug!("Module {} closed", name),
            Ok(Err(e)) => error!("Module {} failed to close cleanly: {}", name, e),
            Err(_) => error!(
                "Module {} did not close within {}s; it appears deadlocked",
                name, SHUTDOWN_MODULE_TIMEOUT_SECS
            ),
        }
    }
}
