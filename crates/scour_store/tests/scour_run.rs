//! End-to-end scrub runs over in-memory nodes: coverage chain, totals,
//! whole-database ordering, and the published record stream.

mod common;

use common::{assert_full_coverage, batch_entries, join, seeded_state};
use serde_json::json;

use scour_store::{run_scour_command, CheckRecord, Namespace, WriteLog};

#[test]
fn single_collection_run_covers_the_full_range() {
    let state = seeded_state("app", &["a", "b"], 50);
    let ns = Namespace::new("app", "a");

    join(run_scour_command(&state, "app", &json!({ "scour": "a" })));

    let batches = batch_entries(&state, &ns);
    assert_full_coverage(&batches);
    assert!(batches.iter().all(|b| b.success));

    let total_docs: u64 = batches.iter().map(|b| b.count).sum();
    assert_eq!(total_docs, 50);
    let expected_bytes: u64 = (0..50).map(|i| common::doc_body("a", i).len() as u64).sum();
    let total_bytes: u64 = batches.iter().map(|b| b.bytes).sum();
    assert_eq!(total_bytes, expected_bytes);

    // Only collection "a" was scrubbed.
    assert!(batch_entries(&state, &Namespace::new("app", "b")).is_empty());
}

#[test]
fn large_collection_runs_in_chained_batches() {
    let state = seeded_state("app", &["big"], 12_000);
    let ns = Namespace::new("app", "big");

    join(run_scour_command(&state, "app", &json!({ "scour": "big" })));

    let batches = batch_entries(&state, &ns);
    assert_eq!(batches.len(), 3, "12k documents split at 5k per batch");
    assert_eq!(
        batches.iter().map(|b| b.count).collect::<Vec<_>>(),
        vec![5_000, 5_000, 2_000]
    );
    assert_full_coverage(&batches);
}

#[test]
fn empty_collection_yields_one_full_range_batch() {
    let state = seeded_state("app", &["empty"], 0);
    let ns = Namespace::new("app", "empty");

    join(run_scour_command(&state, "app", &json!({ "scour": "empty" })));

    let batches = batch_entries(&state, &ns);
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert!(batch.min_key.is_min());
    assert!(batch.max_key.is_max());
    assert_eq!(batch.count, 0);
    assert_eq!(batch.bytes, 0);
}

#[test]
fn whole_database_run_emits_collections_in_catalog_order() {
    let state = seeded_state("app", &["c", "a", "b"], 10);

    join(run_scour_command(&state, "app", &json!({ "scour": 1 })));

    // The record stream interleaves per collection: Collection then its
    // batches, collections in catalog (name) order.
    let records = state.oplog.read_all().expect("read oplog");
    let mut collection_order = Vec::new();
    let mut current: Option<Namespace> = None;
    for entry in &records {
        match &entry.record {
            CheckRecord::Collection { nss, .. } => {
                collection_order.push(nss.coll.clone());
                current = Some(nss.clone());
            }
            CheckRecord::Batch { nss, .. } => {
                assert_eq!(
                    Some(nss),
                    current.as_ref(),
                    "batch records must follow their collection record"
                );
            }
        }
    }
    assert_eq!(collection_order, vec!["a", "b", "c"]);

    for name in ["a", "b", "c"] {
        let batches = batch_entries(&state, &Namespace::new("app", name));
        assert_full_coverage(&batches);
        assert_eq!(batches.iter().map(|b| b.count).sum::<u64>(), 10);
    }
}

#[test]
fn batch_records_chain_identically_to_health_entries() {
    let state = seeded_state("app", &["a"], 25);
    let ns = Namespace::new("app", "a");

    join(run_scour_command(&state, "app", &json!({ "scour": "a" })));

    let records = state.oplog.read_all().expect("read oplog");
    let published: Vec<(String, scour_store::RecordKey, scour_store::RecordKey)> = records
        .iter()
        .filter_map(|entry| match &entry.record {
            CheckRecord::Batch {
                md5,
                min_key,
                max_key,
                ..
            } => Some((md5.clone(), min_key.clone(), max_key.clone())),
            _ => None,
        })
        .collect();

    let batches = batch_entries(&state, &ns);
    assert_eq!(published.len(), batches.len());
    for (record, entry) in published.iter().zip(&batches) {
        assert_eq!(record.0, entry.md5);
        assert_eq!(record.1, entry.min_key);
        assert_eq!(record.2, entry.max_key);
    }

    // Timestamps in the log are strictly increasing.
    for pair in records.windows(2) {
        assert!(pair[0].ts < pair[1].ts);
    }
}

#[test]
fn collection_records_carry_uuid_neighborhood() {
    let state = seeded_state("app", &["a", "b", "c"], 1);

    join(run_scour_command(&state, "app", &json!({ "scour": 1 })));

    let records = state.oplog.read_all().expect("read oplog");
    let mut emitted = Vec::new();
    for entry in &records {
        if let CheckRecord::Collection {
            uuid, prev, next, ..
        } = &entry.record
        {
            emitted.push((*uuid, *prev, *next));
        }
    }
    assert_eq!(emitted.len(), 3);

    let mut by_uuid: Vec<_> = emitted.iter().map(|(uuid, ..)| *uuid).collect();
    by_uuid.sort();
    for (uuid, prev, next) in &emitted {
        // Each record's neighbors are its neighbors in UUID order.
        let pos = by_uuid.iter().position(|u| u == uuid).expect("uuid present");
        assert_eq!(*prev, pos.checked_sub(1).map(|p| by_uuid[p]));
        assert_eq!(*next, by_uuid.get(pos + 1).copied());
    }
}
