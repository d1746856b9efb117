//! Shared helpers for scrubber integration tests.

use std::sync::Arc;

use scour_store::health::EntryData;
use scour_store::{
    CollectionOptions, HealthLogEntry, IndexSpec, Namespace, NodeState, RecordKey, ScourLaunch,
    Severity,
};

/// A primary node with `docs` documents in each named collection.
pub fn seeded_state(db: &str, collections: &[&str], docs: u64) -> Arc<NodeState> {
    let state = NodeState::in_memory();
    for name in collections {
        seed_collection(&state, db, name, docs);
    }
    state
}

pub fn seed_collection(state: &Arc<NodeState>, db: &str, name: &str, docs: u64) {
    let coll = state
        .catalog
        .create_collection(
            Namespace::new(db, name),
            CollectionOptions::default(),
            vec![IndexSpec::primary()],
        )
        .expect("create collection");
    for i in 0..docs {
        coll.insert(doc_key(i), doc_body(name, i)).expect("insert");
    }
}

pub fn doc_key(i: u64) -> Vec<u8> {
    format!("k{i:08}").into_bytes()
}

pub fn doc_body(name: &str, i: u64) -> Vec<u8> {
    format!("{{\"coll\":\"{name}\",\"seq\":{i}}}").into_bytes()
}

/// Launch must have succeeded; wait for the worker.
pub fn join(launch: ScourLaunch) {
    assert!(launch.response.ok, "command rejected: {:?}", launch.response.err);
    launch.job.expect("job handle").join().expect("worker join");
}

/// Successful batch entries for one namespace, in log order.
pub fn batch_entries(state: &NodeState, ns: &Namespace) -> Vec<BatchView> {
    state
        .health
        .entries()
        .into_iter()
        .filter(|entry| entry.namespace == *ns && entry.severity == Severity::Info)
        .filter_map(|entry| match entry.data {
            EntryData::Batch {
                min_key,
                max_key,
                count,
                bytes,
                md5,
                success,
                ..
            } => Some(BatchView {
                min_key,
                max_key,
                count,
                bytes,
                md5,
                success,
            }),
            _ => None,
        })
        .collect()
}

/// Flattened successful batch entry.
#[derive(Debug, Clone)]
pub struct BatchView {
    pub min_key: RecordKey,
    pub max_key: RecordKey,
    pub count: u64,
    pub bytes: u64,
    pub md5: String,
    pub success: bool,
}

/// Assert the full-coverage chain: first batch starts at MinKey, adjacent
/// batches share a boundary, and the last batch ends at MaxKey.
pub fn assert_full_coverage(batches: &[BatchView]) {
    assert!(!batches.is_empty(), "expected at least one batch");
    assert!(
        batches.first().expect("first").min_key.is_min(),
        "first batch must start at MinKey"
    );
    assert!(
        batches.last().expect("last").max_key.is_max(),
        "last batch must end at MaxKey"
    );
    for pair in batches.windows(2) {
        assert_eq!(
            pair[1].min_key, pair[0].max_key,
            "adjacent batches must share a boundary"
        );
    }
    assert_eq!(
        batches.iter().filter(|b| b.min_key.is_min()).count(),
        1,
        "exactly one batch starts at MinKey"
    );
    assert_eq!(
        batches.iter().filter(|b| b.max_key.is_max()).count(),
        1,
        "exactly one batch ends at MaxKey"
    );
}

/// Error-severity entries for one namespace.
pub fn error_entries(state: &NodeState, ns: &Namespace) -> Vec<HealthLogEntry> {
    state
        .health
        .entries()
        .into_iter()
        .filter(|entry| entry.namespace == *ns && entry.severity == Severity::Error)
        .collect()
}
