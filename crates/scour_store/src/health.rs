//! Node-local health log: the operator-visible channel for scrub results.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{CollectionOptions, IndexSpec, Namespace};
use crate::error::ScourError;
use crate::hasher::BatchStats;
use crate::key::RecordKey;
use crate::oplog::{now_unix_ms, LogTimestamp};

/// Entries kept before the oldest are dropped.
pub const HEALTH_LOG_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Which scrub phase an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckPhase {
    #[serde(rename = "scourCollection")]
    Collection,
    #[serde(rename = "scourBatch")]
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryData {
    #[serde(rename_all = "camelCase")]
    Batch {
        min_key: RecordKey,
        max_key: RecordKey,
        count: u64,
        bytes: u64,
        md5: String,
        success: bool,
        log_time: LogTimestamp,
    },
    #[serde(rename_all = "camelCase")]
    Collection {
        uuid: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<Uuid>,
        indexes: Vec<IndexSpec>,
        options: CollectionOptions,
        log_time: LogTimestamp,
    },
    Failure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthLogEntry {
    pub namespace: Namespace,
    pub severity: Severity,
    pub operation: CheckPhase,
    pub timestamp_ms: u64,
    pub data: EntryData,
}

/// A successful batch entry. The digest is recorded once; a secondary that
/// re-runs the batch logs its own entry with its own digest, and comparison
/// happens between entries, not within one.
pub fn batch_entry(
    ns: &Namespace,
    stats: &BatchStats,
    min_key: &RecordKey,
    log_time: LogTimestamp,
) -> HealthLogEntry {
    HealthLogEntry {
        namespace: ns.clone(),
        severity: Severity::Info,
        operation: CheckPhase::Batch,
        timestamp_ms: now_unix_ms(),
        data: EntryData::Batch {
            min_key: min_key.clone(),
            max_key: stats.last_key.clone(),
            count: stats.n_docs,
            bytes: stats.n_bytes,
            md5: stats.md5.clone(),
            success: true,
            log_time,
        },
    }
}

/// A failed batch: severity error, failure reason in the data.
pub fn batch_error_entry(ns: &Namespace, err: &ScourError) -> HealthLogEntry {
    HealthLogEntry {
        namespace: ns.clone(),
        severity: Severity::Error,
        operation: CheckPhase::Batch,
        timestamp_ms: now_unix_ms(),
        data: EntryData::Failure {
            message: err.to_string(),
        },
    }
}

/// A published collection metadata record.
#[allow(clippy::too_many_arguments)]
pub fn collection_entry(
    ns: &Namespace,
    uuid: Uuid,
    prev: Option<Uuid>,
    next: Option<Uuid>,
    indexes: Vec<IndexSpec>,
    options: CollectionOptions,
    log_time: LogTimestamp,
) -> HealthLogEntry {
    HealthLogEntry {
        namespace: ns.clone(),
        severity: Severity::Info,
        operation: CheckPhase::Collection,
        timestamp_ms: now_unix_ms(),
        data: EntryData::Collection {
            uuid,
            prev,
            next,
            indexes,
            options,
            log_time,
        },
    }
}

/// Collection-phase failure. Severity distinguishes a vanished collection
/// (warning, the run moves on) from a publish failure (error).
pub fn collection_error_entry(ns: &Namespace, severity: Severity, message: String) -> HealthLogEntry {
    HealthLogEntry {
        namespace: ns.clone(),
        severity,
        operation: CheckPhase::Collection,
        timestamp_ms: now_unix_ms(),
        data: EntryData::Failure { message },
    }
}

/// Append-only capped sink of scrub events.
///
/// Logging never fails; entries are also emitted through `tracing` at their
/// severity so operators see them without polling the sink.
pub struct HealthLog {
    entries: Mutex<VecDeque<HealthLogEntry>>,
    cap: usize,
}

impl Default for HealthLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthLog {
    pub fn new() -> Self {
        Self::with_capacity(HEALTH_LOG_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }

    pub fn log(&self, entry: HealthLogEntry) {
        match entry.severity {
            Severity::Info => tracing::info!(
                namespace = %entry.namespace,
                operation = ?entry.operation,
                "health log entry"
            ),
            Severity::Warning => tracing::warn!(
                namespace = %entry.namespace,
                operation = ?entry.operation,
                data = ?entry.data,
                "health log entry"
            ),
            Severity::Error => tracing::error!(
                namespace = %entry.namespace,
                operation = ?entry.operation,
                data = ?entry.data,
                "health log entry"
            ),
        }

        let Ok(mut guard) = self.entries.lock() else {
            return;
        };
        guard.push_back(entry);
        while guard.len() > self.cap {
            guard.pop_front();
        }
    }

    /// Snapshot of the current entries, oldest first.
    pub fn entries(&self) -> Vec<HealthLogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn export_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.entries()).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(ns: &Namespace, i: usize) -> HealthLogEntry {
        collection_error_entry(ns, Severity::Warning, format!("failure {i}"))
    }

    #[test]
    fn sink_is_capped_and_ordered() {
        let ns = Namespace::new("app", "events");
        let log = HealthLog::with_capacity(3);
        for i in 0..5 {
            log.log(failure(&ns, i));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        match &entries[0].data {
            EntryData::Failure { message } => assert_eq!(message, "failure 2"),
            other => panic!("unexpected entry data: {other:?}"),
        }
    }

    #[test]
    fn batch_entry_serializes_wire_field_names() {
        let ns = Namespace::new("app", "events");
        let stats = BatchStats {
            n_docs: 3,
            n_bytes: 42,
            last_key: RecordKey::max(),
            md5: "abc".into(),
        };
        let entry = batch_entry(&ns, &stats, &RecordKey::min(), LogTimestamp(7));
        let json = serde_json::to_value(&entry).expect("encode");
        let data = &json["data"]["Batch"];
        assert_eq!(data["count"], 3);
        assert_eq!(data["bytes"], 42);
        assert_eq!(data["success"], true);
        assert!(data.get("minKey").is_some());
        assert!(data.get("maxKey").is_some());
        assert!(data.get("logTime").is_some());
    }
}
