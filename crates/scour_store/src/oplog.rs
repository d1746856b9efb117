//! Replicated write log records and the scrub worker's log bridge.
//!
//! Scrub records are appended to the node's replicated operation log so that
//! secondaries can re-run the identical hash computation. `FileOplog` keeps
//! the records in a length+crc32 framed append-only file; `MemOplog` backs
//! tests and embedded use. `LogBridge` is the only append path the scrub
//! worker uses: it holds the role-transfer latch shared across the
//! interrupt/writability checks and the append so no stepdown can commit in
//! between.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{CollectionOptions, IndexSpec, Namespace};
use crate::error::{ScourError, ScourResult};
use crate::key::RecordKey;
use crate::repl::ReplicationCoordinator;

const OPLOG_FILE: &str = "oplog.log";

/// Position of a record in the replicated log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogTimestamp(pub u64);

impl std::fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ts({})", self.0)
    }
}

/// A scrub record as replicated to secondaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CheckRecord {
    /// Announces the collection a following run of `Batch` records covers,
    /// along with its catalog neighborhood so secondaries can detect
    /// membership drift.
    Collection {
        nss: Namespace,
        uuid: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<Uuid>,
        indexes: Vec<IndexSpec>,
        options: CollectionOptions,
    },
    /// One hashed slice of the collection.
    #[serde(rename_all = "camelCase")]
    Batch {
        nss: Namespace,
        md5: String,
        min_key: RecordKey,
        max_key: RecordKey,
    },
}

impl CheckRecord {
    pub fn nss(&self) -> &Namespace {
        match self {
            CheckRecord::Collection { nss, .. } | CheckRecord::Batch { nss, .. } => nss,
        }
    }
}

/// One appended log entry: the record plus its position and wall time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogEntry {
    pub ts: LogTimestamp,
    pub wall_ms: u64,
    pub record: CheckRecord,
}

/// The node's replicated write log, as consumed by the scrubber.
///
/// Appends are serialized by the log itself; the returned timestamp is the
/// record's position in the replication stream.
pub trait WriteLog: Send + Sync + 'static {
    fn append(&self, record: CheckRecord) -> anyhow::Result<LogTimestamp>;
    fn read_all(&self) -> anyhow::Result<Vec<OplogEntry>>;
}

/// In-memory write log.
#[derive(Default)]
pub struct MemOplog {
    entries: Mutex<Vec<OplogEntry>>,
}

impl MemOplog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WriteLog for MemOplog {
    fn append(&self, record: CheckRecord) -> anyhow::Result<LogTimestamp> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow!("oplog lock poisoned"))?;
        let ts = LogTimestamp(guard.len() as u64 + 1);
        guard.push(OplogEntry {
            ts,
            wall_ms: now_unix_ms(),
            record,
        });
        Ok(ts)
    }

    fn read_all(&self) -> anyhow::Result<Vec<OplogEntry>> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| anyhow!("oplog lock poisoned"))?;
        Ok(guard.clone())
    }
}

struct FileOplogInner {
    file: File,
    next_ts: u64,
}

/// File-backed write log with crc32-framed JSON records.
pub struct FileOplog {
    path: PathBuf,
    inner: Mutex<FileOplogInner>,
}

impl FileOplog {
    pub fn open_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).context("create oplog dir")?;
        let path = dir.join(OPLOG_FILE);

        // Recover the next timestamp from whatever is already on disk.
        let existing = read_entries(&path)?;
        let next_ts = existing.last().map(|e| e.ts.0 + 1).unwrap_or(1);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("open oplog file")?;
        Ok(Self {
            path,
            inner: Mutex::new(FileOplogInner { file, next_ts }),
        })
    }
}

impl WriteLog for FileOplog {
    fn append(&self, record: CheckRecord) -> anyhow::Result<LogTimestamp> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("oplog lock poisoned"))?;
        let entry = OplogEntry {
            ts: LogTimestamp(guard.next_ts),
            wall_ms: now_unix_ms(),
            record,
        };
        let payload = serde_json::to_vec(&entry).context("encode oplog entry")?;
        write_record(&mut guard.file, &payload)?;
        guard.file.flush().context("flush oplog")?;
        guard.next_ts += 1;
        Ok(entry.ts)
    }

    fn read_all(&self) -> anyhow::Result<Vec<OplogEntry>> {
        read_entries(&self.path)
    }
}

fn write_record(file: &mut File, payload: &[u8]) -> anyhow::Result<()> {
    let len = payload.len() as u32;
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let checksum = hasher.finalize();
    file.write_all(&len.to_be_bytes()).context("oplog write")?;
    file.write_all(&checksum.to_be_bytes())
        .context("oplog write")?;
    file.write_all(payload).context("oplog write")?;
    Ok(())
}

fn read_entries(path: &Path) -> anyhow::Result<Vec<OplogEntry>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let expected_crc = u32::from_be_bytes(crc_buf);
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        anyhow::ensure!(hasher.finalize() == expected_crc, "oplog checksum mismatch");
        entries.push(serde_json::from_slice(&payload).context("decode oplog entry")?);
    }
    Ok(entries)
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

/// The scrub worker's only path to the write log.
///
/// A failed pre-check here means the node is no longer eligible to drive the
/// audit, so both checks set the job's terminal flag before returning.
pub struct LogBridge {
    log: Arc<dyn WriteLog>,
    repl: Arc<ReplicationCoordinator>,
    killed: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl LogBridge {
    pub fn new(
        log: Arc<dyn WriteLog>,
        repl: Arc<ReplicationCoordinator>,
        killed: Arc<AtomicBool>,
        done: Arc<AtomicBool>,
    ) -> Self {
        Self {
            log,
            repl,
            killed,
            done,
        }
    }

    /// Append one record, returning its replication timestamp.
    ///
    /// The transfer latch is held shared for the whole call. Stepdown takes
    /// the same latch exclusively, so between the checks below and the append
    /// no role change can commit.
    pub fn publish(&self, ns: &Namespace, record: CheckRecord) -> ScourResult<LogTimestamp> {
        let _latch = self
            .repl
            .transfer_latch()
            .read()
            .map_err(|_| ScourError::Storage(anyhow!("transfer latch poisoned")))?;

        if self.killed.load(Ordering::SeqCst) {
            self.done.store(true, Ordering::SeqCst);
            return Err(ScourError::Interrupted);
        }

        if !self.repl.can_accept_writes_for(ns) {
            self.done.store(true, Ordering::SeqCst);
            return Err(ScourError::PrimarySteppedDown);
        }

        Ok(self.log.append(record)?)
    }
}
