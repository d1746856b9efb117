//! Cross-node digest comparison: identical data hashes identically, a
//! single divergent document is caught by the batch covering its key.

mod common;

use common::{batch_entries, doc_key, join, seeded_state};
use serde_json::json;

use scour_store::{hash_batch, run_scour_command, CheckRecord, Namespace, RecordKey, WriteLog};

#[test]
fn identical_nodes_produce_identical_digest_sequences() {
    let ns = Namespace::new("app", "a");
    let primary = seeded_state("app", &["a"], 7_500);
    let secondary = seeded_state("app", &["a"], 7_500);

    join(run_scour_command(&primary, "app", &json!({ "scour": "a" })));
    join(run_scour_command(&secondary, "app", &json!({ "scour": "a" })));

    let primary_digests: Vec<String> = batch_entries(&primary, &ns)
        .into_iter()
        .map(|b| b.md5)
        .collect();
    let secondary_digests: Vec<String> = batch_entries(&secondary, &ns)
        .into_iter()
        .map(|b| b.md5)
        .collect();
    assert_eq!(primary_digests.len(), 2);
    assert_eq!(primary_digests, secondary_digests);
}

#[test]
fn published_batches_replay_to_equal_digests_on_a_clean_replica() {
    let ns = Namespace::new("app", "a");
    let primary = seeded_state("app", &["a"], 7_500);
    let replica = seeded_state("app", &["a"], 7_500);

    join(run_scour_command(&primary, "app", &json!({ "scour": "a" })));

    // Re-run each published batch range on the replica, the way its oplog
    // applier would, and compare digests.
    let coll = replica.catalog.get(&ns).expect("replica collection");
    for entry in primary.oplog.read_all().expect("read") {
        let CheckRecord::Batch {
            md5,
            min_key,
            max_key,
            ..
        } = entry.record
        else {
            continue;
        };
        let stats = hash_batch(&coll, &min_key, &max_key, u64::MAX, u64::MAX).expect("replay");
        assert_eq!(stats.md5, md5, "range [{min_key}, {max_key}] must match");
    }
}

#[test]
fn divergent_document_flips_exactly_the_covering_batch() {
    let ns = Namespace::new("app", "a");
    let primary = seeded_state("app", &["a"], 7_500);
    let secondary = seeded_state("app", &["a"], 7_500);

    // Out-of-band corruption on the secondary: one document in the second
    // batch's range differs.
    secondary
        .catalog
        .get(&ns)
        .expect("collection")
        .insert(doc_key(6_000), b"corrupted".to_vec())
        .expect("insert");

    join(run_scour_command(&primary, "app", &json!({ "scour": "a" })));
    join(run_scour_command(&secondary, "app", &json!({ "scour": "a" })));

    let primary_batches = batch_entries(&primary, &ns);
    let secondary_batches = batch_entries(&secondary, &ns);
    assert_eq!(primary_batches.len(), secondary_batches.len());

    for (p, s) in primary_batches.iter().zip(&secondary_batches) {
        assert_eq!(p.min_key, s.min_key);
        assert_eq!(p.max_key, s.max_key);
        let covers = p.min_key.cmp_bytes(&doc_key(6_000)) == std::cmp::Ordering::Less
            && p.max_key.cmp_bytes(&doc_key(6_000)) != std::cmp::Ordering::Less;
        if covers {
            assert_ne!(p.md5, s.md5, "covering batch must expose the divergence");
        } else {
            assert_eq!(p.md5, s.md5, "other batches must still match");
        }
    }
}

#[test]
fn writes_between_batches_do_not_break_the_coverage_chain() {
    let ns = Namespace::new("app", "a");
    let state = seeded_state("app", &["a"], 12_000);
    let coll = state.catalog.get(&ns).expect("collection");

    // Interleave mutations with the run from another thread. Totals will
    // not match any single point-in-time count, but the boundary chain must
    // stay intact and no error entries may appear.
    let writer = {
        let coll = coll.clone();
        std::thread::spawn(move || {
            for i in 0..2_000u64 {
                let key = doc_key(20_000 + i);
                coll.insert(key.clone(), b"late".to_vec()).expect("insert");
                if i % 3 == 0 {
                    coll.remove(&doc_key(i)).expect("remove");
                }
            }
        })
    };

    join(run_scour_command(&state, "app", &json!({ "scour": "a" })));
    writer.join().expect("writer join");

    let batches = batch_entries(&state, &ns);
    common::assert_full_coverage(&batches);
    assert!(common::error_entries(&state, &ns).is_empty());
    assert!(batches.iter().all(|b| b.count <= 5_000));
}

#[test]
fn batch_boundaries_come_from_hashed_keys() {
    // The first batch of 7.5k docs caps at 5k documents, so its max key is
    // the 5000th key and the next batch resumes there exclusively.
    let ns = Namespace::new("app", "a");
    let state = seeded_state("app", &["a"], 7_500);

    join(run_scour_command(&state, "app", &json!({ "scour": "a" })));

    let batches = batch_entries(&state, &ns);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].max_key, RecordKey::Key(doc_key(4_999)));
    assert_eq!(batches[1].min_key, RecordKey::Key(doc_key(4_999)));
    assert!(batches[1].max_key.is_max());
    assert_eq!(batches[1].count, 2_500);
}
