//! The background scrub worker.
//!
//! One worker per command invocation, on its own named thread; the command
//! handler returns to the client as soon as the thread is launched. The
//! worker walks the run's collections strictly in sequence, and within a
//! collection drives the hasher batch by batch, publishing every batch to
//! the replicated log before recording it in the health log. Batch
//! boundaries chain: each batch starts at the previous batch's last key, so
//! the published sequence covers the requested range with no gaps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;

use crate::error::ScourError;
use crate::hasher::{hash_batch, BatchStats};
use crate::health::{
    batch_entry, batch_error_entry, collection_entry, collection_error_entry, Severity,
};
use crate::key::RecordKey;
use crate::oplog::{CheckRecord, LogBridge, LogTimestamp};
use crate::plan::{CheckRun, CollectionCheckInfo};
use crate::NodeState;

/// Per-batch document cap.
pub const BATCH_DOCS: u64 = 5_000;
/// Per-batch byte cap.
pub const BATCH_BYTES: u64 = 20_000_000;

/// Handle to a running scrub worker.
pub struct CheckJobHandle {
    killed: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CheckJobHandle {
    /// Ask the worker to stop. Observed cooperatively at the next log
    /// publish; already-published records stand.
    pub fn interrupt(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Whether the worker hit a terminal condition.
    pub fn is_terminated(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to finish.
    pub fn join(mut self) -> anyhow::Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("scrub worker panicked"))?;
        }
        Ok(())
    }
}

/// Launch the scrub worker for `run`. Returns as soon as the thread exists.
pub fn spawn(state: Arc<NodeState>, db: String, run: CheckRun) -> anyhow::Result<CheckJobHandle> {
    let killed = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let worker = CheckWorker {
        bridge: LogBridge::new(
            state.oplog.clone(),
            state.repl.clone(),
            killed.clone(),
            done.clone(),
        ),
        state,
        db,
        done: done.clone(),
    };

    let thread = thread::Builder::new()
        .name("scour".to_string())
        .spawn(move || worker.run(run))
        .context("spawn scour worker")?;

    Ok(CheckJobHandle {
        killed,
        done,
        thread: Some(thread),
    })
}

struct CheckWorker {
    state: Arc<NodeState>,
    db: String,
    bridge: LogBridge,
    /// Terminal flag: set by the bridge on interruption or stepdown, read by
    /// the loops below after every publish.
    done: Arc<AtomicBool>,
}

impl CheckWorker {
    fn run(&self, run: CheckRun) {
        tracing::info!(db = %self.db, collections = run.len(), "scour run started");

        for info in &run {
            self.check_collection(info);

            if self.terminated() {
                tracing::info!(db = %self.db, "scour run terminated early");
                return;
            }
        }

        tracing::info!(db = %self.db, "scour run finished");
    }

    fn terminated(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn check_collection(&self, info: &CollectionCheckInfo) {
        if !self.publish_collection_metadata(info) {
            return;
        }
        if self.terminated() {
            return;
        }

        let mut start = info.start.clone();
        let mut total_docs = 0u64;
        let mut total_bytes = 0u64;

        loop {
            let docs_cap = BATCH_DOCS.min(info.max_count.saturating_sub(total_docs));
            let bytes_cap = BATCH_BYTES.min(info.max_size.saturating_sub(total_bytes));

            let (stats, log_time) = match self.run_batch(info, &start, docs_cap, bytes_cap) {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Terminal errors have already set the done flag via the
                    // bridge; either way this collection is finished.
                    self.state.health.log(batch_error_entry(&info.ns, &err));
                    tracing::warn!(
                        namespace = %info.ns,
                        error = %err,
                        "scour batch failed"
                    );
                    return;
                }
            };

            self.state
                .health
                .log(batch_entry(&info.ns, &stats, &start, log_time));

            start = stats.last_key.clone();
            total_docs += stats.n_docs;
            total_bytes += stats.n_bytes;

            if self.terminated() {
                return;
            }

            let reached_last = start >= info.end;
            if reached_last || total_docs >= info.max_count || total_bytes >= info.max_size {
                return;
            }
        }
    }

    /// Publish the collection metadata record and its health entry.
    ///
    /// Returns whether the batch loop should run. A vanished collection is
    /// not fatal to the run; a publish failure aborts at least this
    /// collection (and the run, if the bridge flagged it terminal).
    fn publish_collection_metadata(&self, info: &CollectionCheckInfo) -> bool {
        let Some((collection, prev, next)) = self.state.catalog.resolve_with_neighbors(&info.ns)
        else {
            self.state.health.log(collection_error_entry(
                &info.ns,
                Severity::Warning,
                "collection not found".to_string(),
            ));
            return false;
        };

        let record = CheckRecord::Collection {
            nss: info.ns.clone(),
            uuid: collection.uuid(),
            prev,
            next,
            indexes: collection.indexes().to_vec(),
            options: collection.options().clone(),
        };

        match self.bridge.publish(&info.ns, record) {
            Ok(log_time) => {
                self.state.health.log(collection_entry(
                    &info.ns,
                    collection.uuid(),
                    prev,
                    next,
                    collection.indexes().to_vec(),
                    collection.options().clone(),
                    log_time,
                ));
                true
            }
            Err(err) => {
                self.state.health.log(collection_error_entry(
                    &info.ns,
                    Severity::Error,
                    err.to_string(),
                ));
                tracing::warn!(
                    namespace = %info.ns,
                    error = %err,
                    "scour collection record failed"
                );
                false
            }
        }
    }

    /// Hash one batch and publish it. The published record's `max_key` is
    /// the hasher's `last_key`, which the next iteration uses as its start.
    fn run_batch(
        &self,
        info: &CollectionCheckInfo,
        start: &RecordKey,
        docs_cap: u64,
        bytes_cap: u64,
    ) -> Result<(BatchStats, LogTimestamp), ScourError> {
        let collection = self
            .state
            .catalog
            .get(&info.ns)
            .ok_or_else(|| ScourError::NamespaceNotFound(info.ns.to_string()))?;

        let stats = hash_batch(&collection, start, &info.end, docs_cap, bytes_cap)?;

        let record = CheckRecord::Batch {
            nss: info.ns.clone(),
            md5: stats.md5.clone(),
            min_key: start.clone(),
            max_key: stats.last_key.clone(),
        };
        let log_time = self.bridge.publish(&info.ns, record)?;

        Ok((stats, log_time))
    }
}
