mod common;

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use sia_common::api::renter::Allowance;
use sia_common::config::MIN_STORAGE_FOLDER_SIZE;
use sia_common::currency::Currency;
use sia_daemon::config::CONSENSUS_CHANGE_BEGINNING;
use sia_daemon::host::Host;
use sia_daemon::renter::{Renter, RenterError};

use common::{mine_blocks, test_node, wait_for, TestNode};

const HOST_PORT: u16 = 42252;

struct StorageHarness {
    node: TestNode,
    host: Arc<Host>,
    renter: Arc<Renter>,
}

// One process plays both sides: a host with a storage folder and an
// announced address, and a renter funded by the same mining wallet.
async fn storage_harness(name: &str, gateway_port: u16, host_port: u16) -> StorageHarness {
    let node = test_node(name, gateway_port).await;
    let data_dir = node.dir.path().to_string_lossy().to_string();

    let host = Host::new(
        Arc::clone(&node.consensus),
        Arc::clone(&node.tpool),
        Arc::clone(&node.wallet),
        &format!("127.0.0.1:{}", host_port),
        &data_dir,
    )
    .unwrap();
    node.consensus
        .subscribe(Arc::clone(&host) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
        .await
        .unwrap();
    host.start().await.unwrap();

    let renter = Renter::new(
        Arc::clone(&node.consensus),
        Arc::clone(&node.tpool),
        Arc::clone(&node.wallet),
        &data_dir,
    )
    .unwrap();
    node.consensus
        .subscribe(
            Arc::clone(&renter.hostdb) as Arc<_>,
            CONSENSUS_CHANGE_BEGINNING,
        )
        .await
        .unwrap();
    node.consensus
        .subscribe(Arc::clone(&renter) as Arc<_>, CONSENSUS_CHANGE_BEGINNING)
        .await
        .unwrap();
    renter.start().await;

    StorageHarness { node, host, renter }
}

async fn prepare_host(harness: &StorageHarness, host_port: u16) {
    // fund the wallet before announcing
    mine_blocks(&harness.node, 5).await;
    wait_for("mining funds", Duration::from_secs(10), || {
        let wallet = Arc::clone(&harness.node.wallet);
        async move { !wallet.confirmed_balance().await.0.is_zero() }
    })
    .await;

    let folder = harness.node.dir.path().join("host-folder");
    harness
        .host
        .add_storage_folder(&folder.to_string_lossy(), MIN_STORAGE_FOLDER_SIZE)
        .await
        .unwrap();

    let mut settings = harness.host.internal_settings().await;
    settings.accepting_contracts = true;
    harness.host.set_internal_settings(settings).await.unwrap();

    harness
        .host
        .announce(Some(format!("127.0.0.1:{}", host_port)))
        .await
        .unwrap();

    // confirm the announcement so the hostdb picks it up
    mine_blocks(&harness.node, 2).await;
    wait_for("hostdb entry", Duration::from_secs(15), || {
        let hostdb = Arc::clone(&harness.renter.hostdb);
        async move { !hostdb.all_hosts().await.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn test_vanilla_host_renter_round_trip() {
    let harness = storage_harness("storage-vanilla", 42201, HOST_PORT).await;
    prepare_host(&harness, HOST_PORT).await;

    harness
        .renter
        .set_allowance(Allowance {
            funds: Currency::from_coins(10_000),
            hosts: 1,
            period: 20,
            renew_window: 5,
        })
        .await
        .unwrap();

    // each consensus tick drives the maintenance loop
    mine_blocks(&harness.node, 1).await;
    wait_for("contract formation", Duration::from_secs(30), || {
        let renter = Arc::clone(&harness.renter);
        async move { !renter.contracts().await.is_empty() }
    })
    .await;

    // upload a small random file
    let mut payload = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut payload);
    let source = harness.node.dir.path().join("upload-source.dat");
    std::fs::write(&source, &payload).unwrap();

    harness
        .renter
        .upload(&source.to_string_lossy(), "test", 1, 0)
        .await
        .unwrap();
    wait_for("upload completion", Duration::from_secs(30), || {
        let renter = Arc::clone(&harness.renter);
        async move {
            renter
                .files()
                .await
                .iter()
                .any(|file| file.siapath == "test" && file.upload_progress >= 10.0)
        }
    })
    .await;

    // download to a fresh path and compare byte for byte
    let destination = harness.node.dir.path().join("download-dest.dat");
    wait_for("downloadable file", Duration::from_secs(30), || {
        let renter = Arc::clone(&harness.renter);
        let destination = destination.to_string_lossy().to_string();
        async move { renter.download("test", &destination).await.is_ok() }
    })
    .await;
    assert_eq!(std::fs::read(&destination).unwrap(), payload);

    // revenue accrues across the obligation lifecycle
    mine_blocks(&harness.node, 25).await;
    let metrics = harness.host.financial_metrics().await;
    assert!(!metrics.storage_revenue.is_zero());
    assert!(!metrics.download_bandwidth_revenue.is_zero());

    // relative destinations are refused with the canonical message
    let err = harness.renter.download("test", "relative.dat").await;
    assert!(matches!(err, Err(RenterError::DestinationNotAbsolute)));
}

#[tokio::test]
async fn test_allowance_cancel_blocks_downloads() {
    let host_port = HOST_PORT + 10;
    let harness = storage_harness("storage-cancel", 42202, host_port).await;
    prepare_host(&harness, host_port).await;

    harness
        .renter
        .set_allowance(Allowance {
            funds: Currency::from_coins(10_000),
            hosts: 1,
            period: 20,
            renew_window: 5,
        })
        .await
        .unwrap();
    mine_blocks(&harness.node, 1).await;
    wait_for("contract formation", Duration::from_secs(30), || {
        let renter = Arc::clone(&harness.renter);
        async move { !renter.contracts().await.is_empty() }
    })
    .await;

    let source = harness.node.dir.path().join("cancel-source.dat");
    std::fs::write(&source, vec![7u8; 512]).unwrap();
    harness
        .renter
        .upload(&source.to_string_lossy(), "doomed", 1, 0)
        .await
        .unwrap();
    wait_for("upload completion", Duration::from_secs(30), || {
        let renter = Arc::clone(&harness.renter);
        async move {
            renter
                .files()
                .await
                .iter()
                .any(|file| file.siapath == "doomed" && file.upload_progress >= 100.0)
        }
    })
    .await;

    // cancel the allowance and take the host away
    harness
        .renter
        .set_allowance(Allowance::default())
        .await
        .unwrap();
    harness.host.close().await.unwrap();

    let destination = harness.node.dir.path().join("cancel-dest.dat");
    let err = harness
        .renter
        .download("doomed", &destination.to_string_lossy())
        .await
        .expect_err("download must fail without hosts");
    assert!(
        err.to_string().contains("insufficient hosts"),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn test_wallet_backup_path_safety() {
    let node = test_node("storage-backup", 42203).await;

    let err = node
        .wallet
        .create_backup("test_wallet.backup")
        .await
        .expect_err("relative path must fail");
    assert_eq!(err.to_string(), "destination must be an absolute path");

    let destination = node.dir.path().join("wallet.backup");
    node.wallet
        .create_backup(&destination.to_string_lossy())
        .await
        .unwrap();
    assert!(destination.exists());
}
