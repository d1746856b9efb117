//! Per-batch content hashing over a key-ordered collection slice.

use crate::catalog::Collection;
use crate::error::{ScourError, ScourResult};
use crate::key::RecordKey;

/// What one hashed batch observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub n_docs: u64,
    pub n_bytes: u64,
    /// The key the next batch starts after. Equal to the batch's `end` when
    /// the scan exhausted the range, otherwise the key of the last document
    /// hashed.
    pub last_key: RecordKey,
    /// Hex md5 over the concatenated document bodies in key order.
    pub md5: String,
}

/// Hash one batch of documents.
///
/// Iterates documents with key strictly greater than `first` (or at `first`
/// when `first` is `MinKey`, i.e. the first batch of a collection), upper
/// bounded by `end` inclusive. The first document is always admitted; each
/// further document is admitted only while it keeps the batch within
/// `max_docs` and `max_bytes`, so a single document larger than the byte cap
/// still forms a batch of its own.
///
/// The documents a batch hashes are materialized in one scan, so mutations
/// racing with the batch are not observed by it.
pub fn hash_batch(
    collection: &Collection,
    first: &RecordKey,
    end: &RecordKey,
    max_docs: u64,
    max_bytes: u64,
) -> ScourResult<BatchStats> {
    let inclusive = first.is_min();
    let chunk = collection
        .scan(first, inclusive, end, max_docs, max_bytes)
        .map_err(|err| ScourError::SnapshotUnavailable(err.to_string()))?;

    let mut ctx = md5::Context::new();
    let mut n_docs = 0u64;
    let mut n_bytes = 0u64;
    let mut last_key = first.clone();
    let mut stopped_by_limit = false;

    for doc in &chunk.docs {
        if !admits(n_docs, n_bytes, doc.body.len() as u64, max_docs, max_bytes) {
            stopped_by_limit = true;
            break;
        }
        ctx.consume(&doc.body);
        n_docs += 1;
        n_bytes = n_bytes.saturating_add(doc.body.len() as u64);
        last_key = RecordKey::from(doc.key.clone());
    }

    if !stopped_by_limit && chunk.exhausted {
        // The whole remaining range was consumed; report the range end so the
        // published boundary chain closes at `end`.
        last_key = end.clone();
    }

    Ok(BatchStats {
        n_docs,
        n_bytes,
        last_key,
        md5: format!("{:x}", ctx.compute()),
    })
}

/// Whether the next document may join the batch.
fn admits(n_docs: u64, n_bytes: u64, doc_len: u64, max_docs: u64, max_bytes: u64) -> bool {
    // Always hash at least one document.
    if n_docs == 0 {
        return true;
    }
    if n_docs + 1 > max_docs {
        return false;
    }
    if n_bytes.saturating_add(doc_len) > max_bytes {
        return false;
    }
    true
}
