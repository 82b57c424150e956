//! End-to-end tests of the scan pipeline against a scripted chain.
//!
//! Each test builds a small ledger, runs a [`ScanJob`] over it and checks
//! the pool index and the cursor store afterwards.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use common::{create_tx, scan_config, stub_tx, swap_tx, FakeChain, Harness, StubDecoder};
use solana_pool_indexer::{
    coordinator::JobState,
    decoder::EventDecoder,
    index::{IndexOptions, SwapStatus},
    rpc::{ChainClient, Commitment},
};
use std::time::Duration;
use tokio::time::timeout;

/// Slots 100..=103: pool X created at 100, a swap of 5 at 102.
fn scenario_chain() -> std::sync::Arc<FakeChain> {
    let chain = FakeChain::new();
    chain.push_block(100, vec![create_tx("sigCreate", "X")]);
    chain.push_block(101, vec![]);
    chain.push_block(102, vec![swap_tx("sigSwap", "X", 5)]);
    chain.push_block(103, vec![]);
    chain
}

#[tokio::test]
async fn test_scan_range_scenario() {
    let harness = Harness::new(scenario_chain()).await;

    let report = harness.run(scan_config(Some(100), Some(103))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.cursor, Some(103));
    assert_eq!(harness.cursor().await, Some(103));

    let history = harness.index().query("X").await.unwrap().expect("pool X indexed");
    assert_eq!(history.creation.position.slot, 100);
    assert_eq!(history.creation.signature, "sigCreate");
    assert_eq!(history.swaps.len(), 1);
    assert_eq!(history.swaps[0].position.slot, 102);
    assert_eq!(history.swaps[0].amount_in, 5);
    assert_eq!(history.swaps[0].status, SwapStatus::Attached);

    assert_eq!(report.stats.blocks, 4);
    assert_eq!(report.stats.pools_created, 1);
    assert_eq!(report.stats.swaps_attached, 1);
}

#[tokio::test]
async fn test_duplicate_pool_creation_is_rejected() {
    let chain = scenario_chain();
    chain.push_block(104, vec![]);
    chain.push_block(105, vec![create_tx("sigCreateAgain", "X")]);
    let harness = Harness::new(chain).await;

    let report = harness.run(scan_config(Some(100), Some(105))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.stats.pools_created, 1);
    assert_eq!(report.stats.duplicate_pools, 1);

    let history = harness.index().query("X").await.unwrap().unwrap();
    assert_eq!(history.creation.position.slot, 100);
    assert_eq!(history.creation.signature, "sigCreate");

    let violations = harness.index().consistency_violations().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].signature, "sigCreateAgain");
    assert_eq!(violations[0].existing_signature.as_deref(), Some("sigCreate"));
    assert_eq!(violations[0].slot, 105);
}

#[tokio::test]
async fn test_rescanning_an_indexed_range_changes_nothing() {
    let harness = Harness::new(scenario_chain()).await;
    harness.run(scan_config(Some(100), Some(103))).await;
    let stats_before = harness.index().stats().await.unwrap();
    let cursor_before = harness.cursors().load(&harness.job_key()).await.unwrap().unwrap();

    let report = harness.run(scan_config(Some(100), Some(103))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.stats.pools_created, 0);
    assert_eq!(report.stats.swaps_attached, 0);
    assert_eq!(report.stats.replayed, 2);
    assert_eq!(report.stats.reorgs, 0);

    assert_eq!(harness.index().stats().await.unwrap(), stats_before);
    let cursor_after = harness.cursors().load(&harness.job_key()).await.unwrap().unwrap();
    assert_eq!(cursor_after.last_slot, cursor_before.last_slot);
    assert_eq!(cursor_after.last_blockhash, cursor_before.last_blockhash);
}

#[tokio::test]
async fn test_swaps_are_returned_in_ledger_order() {
    let chain = FakeChain::new();
    // Two swaps in slot 101 (tx 0 and 1), one with two instructions at 103,
    // the pool only at 104, one more swap at 106
    chain.push_block(101, vec![swap_tx("s101a", "P", 1), swap_tx("s101b", "P", 2)]);
    chain.push_block(103, vec![stub_tx("s103", &["swap:P:3", "swap:P:4"])]);
    chain.push_block(104, vec![create_tx("c104", "P")]);
    chain.push_block(106, vec![swap_tx("s106", "P", 5)]);
    let harness = Harness::new(chain).await;

    let report = harness.run(scan_config(Some(101), Some(106))).await;
    assert_eq!(report.stats.swaps_promoted, 4);

    let swaps = harness.index().query("P").await.unwrap().unwrap().swaps;
    let amounts: Vec<u64> = swaps.iter().map(|s| s.amount_in).collect();
    assert_eq!(amounts, vec![1, 2, 3, 4, 5]);
    let positions: Vec<(u64, u32, u32)> = swaps
        .iter()
        .map(|s| (s.position.slot, s.position.tx_index, s.position.instruction_index))
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}

#[tokio::test]
async fn test_skipped_slots_are_recorded_as_gaps() {
    let chain = FakeChain::new();
    chain.push_block(100, vec![]);
    chain.push_block(101, vec![]);
    chain.push_block(103, vec![]);
    // 102 and 104 are skipped
    chain.set_tip(104);
    let harness = Harness::new(chain.clone()).await;

    let report = harness.run(scan_config(Some(100), Some(104))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.stats.gaps, 2);
    assert_eq!(report.cursor, Some(104));

    let gaps = harness.cursors().gaps(&harness.job_key()).await.unwrap();
    let slots: Vec<u64> = gaps.iter().map(|g| g.slot).collect();
    assert_eq!(slots, vec![102, 104]);
    assert!(gaps[0].reason.contains("skipped"));

    let mut fetched = chain.fetches();
    fetched.sort_unstable();
    fetched.dedup();
    assert_eq!(fetched, vec![100, 101, 102, 103, 104]);
}

#[tokio::test]
async fn test_early_swap_attaches_within_retention() {
    let chain = FakeChain::new();
    chain.push_block(100, vec![swap_tx("early", "P", 7)]);
    chain.push_block(101, vec![]);
    chain.push_block(102, vec![]);
    chain.push_block(103, vec![create_tx("create", "P")]);
    let harness = Harness::new(chain).await;

    let report = harness.run(scan_config(Some(100), Some(103))).await;
    assert_eq!(report.stats.swaps_pending, 1);
    assert_eq!(report.stats.swaps_promoted, 1);

    let history = harness.index().query("P").await.unwrap().unwrap();
    assert_eq!(history.swaps.len(), 1);
    assert_eq!(history.swaps[0].signature, "early");
    assert!(harness.index().orphans().await.unwrap().is_empty());
    assert!(harness.index().pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_early_swap_past_retention_is_orphaned() {
    let chain = FakeChain::new();
    chain.push_block(100, vec![swap_tx("early", "P", 7)]);
    for slot in 101..=103 {
        chain.push_block(slot, vec![]);
    }
    chain.push_block(104, vec![create_tx("create", "P")]);
    let harness = Harness::with_options(
        chain,
        IndexOptions {
            retention_slots: 2,
            ..IndexOptions::default()
        },
    )
    .await;

    let report = harness.run(scan_config(Some(100), Some(104))).await;
    assert_eq!(report.stats.expired, 1);
    assert_eq!(report.stats.pools_created, 1);
    assert_eq!(report.stats.swaps_promoted, 0);

    let history = harness.index().query("P").await.unwrap().unwrap();
    assert!(history.swaps.is_empty());

    let orphans = harness.index().orphans().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].signature, "early");
    assert!(orphans[0].orphan_reason.as_deref().unwrap().contains("2 slots"));
}

#[tokio::test]
async fn test_undecodable_instructions_become_anomalies() {
    let chain = FakeChain::new();
    chain.push_block(100, vec![stub_tx("weird", &["create:Q", "burn:everything"])]);
    let harness = Harness::new(chain).await;

    let report = harness.run(scan_config(Some(100), Some(100))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.stats.anomalies, 1);
    assert_eq!(report.stats.pools_created, 1);

    let anomalies = harness.index().anomalies().await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].signature, "weird");
    assert_eq!(anomalies[0].instruction_index, 1);
}

#[tokio::test]
async fn test_resume_after_crash_between_index_write_and_cursor_advance() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("indexer.db").display());

    let chain = scenario_chain();
    chain.push_block(104, vec![swap_tx("sigSwap2", "X", 9)]);

    // First process: indexes 100..=103, then writes slot 104 to the index
    // and "crashes" before the cursor moves
    {
        let harness = Harness::on_disk(chain.clone(), &url).await;
        let report = harness.run(scan_config(Some(100), Some(103))).await;
        assert_eq!(report.cursor, Some(103));

        let tx = chain
            .get_transaction("sigSwap2", Commitment::Confirmed)
            .await
            .unwrap()
            .unwrap();
        let events = StubDecoder.decode(&tx);
        harness.index().apply_slot(104, &events).await.unwrap();
        assert_eq!(harness.cursor().await, Some(103));
        harness.db.close().await;
    }

    // Restart: resume from the cursor, replaying slot 104
    let harness = Harness::on_disk(chain.clone(), &url).await;
    let report = harness.run(scan_config(None, Some(104))).await;
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(report.stats.first_slot, Some(104));
    assert_eq!(report.stats.replayed, 1);
    assert_eq!(report.stats.swaps_attached, 0);
    assert_eq!(report.cursor, Some(104));

    // Same state as a clean scan of the whole range
    let clean = Harness::new(chain).await;
    clean.run(scan_config(Some(100), Some(104))).await;
    assert_eq!(harness.index().stats().await.unwrap(), clean.index().stats().await.unwrap());

    let swaps = harness.index().query("X").await.unwrap().unwrap().swaps;
    let signatures: Vec<&str> = swaps.iter().map(|s| s.signature.as_str()).collect();
    assert_eq!(signatures, vec!["sigSwap", "sigSwap2"]);
}

#[tokio::test]
async fn test_queries_do_not_wait_for_an_open_write() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("indexer.db").display());
    let harness = Harness::on_disk(scenario_chain(), &url).await;
    harness.run(scan_config(Some(100), Some(103))).await;

    // Hold the write lock with an uncommitted change
    let mut writer = harness.db.begin().await.unwrap();
    sqlx::query("UPDATE swaps SET amount_in = '999'")
        .execute(&mut *writer)
        .await
        .unwrap();

    let history = timeout(Duration::from_secs(2), harness.index().query("X"))
        .await
        .expect("query returns while the write is open")
        .unwrap()
        .unwrap();
    assert_eq!(history.swaps[0].amount_in, 5);

    writer.rollback().await.unwrap();
}
