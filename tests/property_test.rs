//! Property-based tests using proptest.
//!
//! These tests verify toggle invariants for arbitrary scan sequences.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use rfid_ledger::infra::{DisabledPublisher, LedgerAdmin, ScanLedger};
use rfid_ledger::{ScanProcessor, ScanStatus, TagCode};

use common::*;

// ============================================================================
// Custom Strategies
// ============================================================================

/// Upper-case hex tag code of 8 characters
fn arb_tag_code() -> impl Strategy<Value = String> {
    "[0-9A-F]{8}"
}

/// A small pool of tags, a subset of them registered, and a scan sequence
/// drawing from the pool
fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<bool>, Vec<usize>)> {
    prop::collection::hash_set(arb_tag_code(), 1..5).prop_flat_map(|tags| {
        let tags: Vec<String> = tags.into_iter().collect();
        let n = tags.len();
        (
            Just(tags),
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec(0..n, 1..30),
        )
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Toggle properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn statuses_follow_the_toggle_model((tags, registered, scans) in arb_scenario()) {
        runtime().block_on(async {
            let ledger = Arc::new(memory_ledger().await);
            for (raw, is_registered) in tags.iter().zip(&registered) {
                if *is_registered {
                    ledger.register(&tag(raw)).await.unwrap();
                }
            }
            let processor = ScanProcessor::new(ledger.clone(), Arc::new(DisabledPublisher));

            let mut model: HashMap<&str, ScanStatus> = HashMap::new();
            for &i in &scans {
                let raw = tags[i].as_str();
                let scan = processor.process_scan(raw).await.unwrap();

                let expected = if registered[i] {
                    model.get(raw).copied().unwrap_or_default().toggled()
                } else {
                    ScanStatus::Absent
                };
                model.insert(raw, expected);

                prop_assert_eq!(scan.record.status, expected);
                prop_assert_eq!(scan.registered, registered[i]);
                prop_assert_eq!(scan.record.registered, registered[i]);
            }
            Ok(())
        })?;
    }

    #[test]
    fn latest_is_last_insert_and_reads_do_not_mutate(
        raw in arb_tag_code(),
        inserts in 1usize..12,
    ) {
        runtime().block_on(async {
            let ledger = memory_ledger().await;
            let tag: TagCode = tag(&raw);

            let mut last = None;
            for i in 0..inserts {
                let status = if i % 2 == 0 { ScanStatus::Present } else { ScanStatus::Absent };
                last = Some(
                    ledger
                        .insert(rfid_ledger::NewScan::new(tag.clone(), status, false))
                        .await
                        .unwrap(),
                );
            }

            let before = ledger.count().await.unwrap();
            let latest = ledger.latest_by_tag(&tag).await.unwrap();
            let registered = ledger.exists_registered(&tag).await.unwrap();
            let after = ledger.count().await.unwrap();

            prop_assert_eq!(latest, last);
            prop_assert!(!registered);
            prop_assert_eq!(before, after);
            prop_assert_eq!(after, inserts as u64);
            Ok(())
        })?;
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_of_one_tag_stay_balanced() {
    let ledger = Arc::new(memory_ledger().await);
    ledger.register(&tag(REGISTERED_TAG)).await.unwrap();
    let processor = Arc::new(ScanProcessor::new(ledger.clone(), Arc::new(DisabledPublisher)));

    let mut handles = Vec::new();
    for _ in 0..25 {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor.process_scan(REGISTERED_TAG).await.unwrap().record
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }
    records.sort_by_key(|r| r.id);

    for pair in records.windows(2) {
        assert_eq!(pair[1].status, pair[0].status.toggled());
    }
    assert_eq!(records[0].status, ScanStatus::Present);

    let present = records
        .iter()
        .filter(|r| r.status == ScanStatus::Present)
        .count();
    let absent = records.len() - present;
    assert!(present.abs_diff(absent) <= 1);
}

// ============================================================================
// Clock skew
// ============================================================================

#[tokio::test]
async fn alternation_survives_a_future_dated_latest_row() {
    let ledger = Arc::new(memory_ledger().await);
    ledger.register(&tag(REGISTERED_TAG)).await.unwrap();
    let processor = ScanProcessor::new(ledger.clone(), Arc::new(DisabledPublisher));

    let first = processor.process_scan(REGISTERED_TAG).await.unwrap().record;
    assert_eq!(first.status, ScanStatus::Present);

    // As if written by a host whose clock ran far ahead.
    sqlx::query("UPDATE rfids SET created_at = ? WHERE id = ?")
        .bind("2099-01-01T00:00:00.000000Z")
        .bind(first.id)
        .execute(ledger.pool())
        .await
        .unwrap();

    let mut statuses = vec![first.status];
    for _ in 0..3 {
        let record = processor.process_scan(REGISTERED_TAG).await.unwrap().record;
        let latest = ledger
            .latest_by_tag(&tag(REGISTERED_TAG))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, record.id);
        statuses.push(record.status);
    }

    assert_eq!(
        statuses,
        vec![
            ScanStatus::Present,
            ScanStatus::Absent,
            ScanStatus::Present,
            ScanStatus::Absent,
        ]
    );
}
