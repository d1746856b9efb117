//! A replicated document store core with an online replica-consistency
//! scrubber.
//!
//! The scrubber walks collections in key order on the primary, hashing
//! key-bounded batches and publishing each batch's boundaries and digest to
//! the replicated write log so every secondary can reproduce the identical
//! computation and compare digests. Findings land in a node-local health
//! log; writes are never blocked.
//!
//! Module map:
//! - `key`: ordered record keys with whole-domain sentinels
//! - `catalog`: namespaces, collections, and storage engines
//! - `hasher`: per-batch content hashing
//! - `plan`: invocation to ordered per-collection run
//! - `job`: the background scrub worker
//! - `oplog`: replicated scrub records and the stepdown-excluded log bridge
//! - `repl`: role tracking and the transfer latch
//! - `health`: the capped operator-visible event sink
//! - `command`: the `scour` command surface

pub mod catalog;
pub mod command;
pub mod error;
pub mod hasher;
pub mod health;
pub mod job;
pub mod key;
pub mod oplog;
pub mod plan;
pub mod repl;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub use catalog::{Catalog, Collection, CollectionOptions, IndexSpec, Namespace};
pub use command::{run_scour_command, AllowAll, AuthSession, CommandResponse, ScourLaunch};
pub use error::{ScourError, ScourResult};
pub use hasher::{hash_batch, BatchStats};
pub use health::{HealthLog, HealthLogEntry, Severity};
pub use job::CheckJobHandle;
pub use key::RecordKey;
pub use oplog::{CheckRecord, FileOplog, LogTimestamp, MemOplog, OplogEntry, WriteLog};
pub use plan::{CheckRun, CollectionCheckInfo};
pub use repl::{MemberRole, ReplicationCoordinator};

/// Feature version an up-to-date node reports.
pub const CURRENT_FEATURE_VERSION: u32 = 40;

/// Everything a node shares between the command surface and the scrub
/// worker.
pub struct NodeState {
    pub catalog: Arc<Catalog>,
    pub oplog: Arc<dyn WriteLog>,
    pub health: Arc<HealthLog>,
    pub repl: Arc<ReplicationCoordinator>,
    pub auth: Arc<dyn AuthSession>,
    feature_version: AtomicU32,
}

impl NodeState {
    pub fn new(
        catalog: Arc<Catalog>,
        oplog: Arc<dyn WriteLog>,
        health: Arc<HealthLog>,
        repl: Arc<ReplicationCoordinator>,
        auth: Arc<dyn AuthSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            oplog,
            health,
            repl,
            auth,
            feature_version: AtomicU32::new(CURRENT_FEATURE_VERSION),
        })
    }

    /// A primary node with in-memory storage, permissive auth, and the
    /// current feature version.
    pub fn in_memory() -> Arc<Self> {
        Self::new(
            Arc::new(Catalog::in_memory()),
            Arc::new(MemOplog::new()),
            Arc::new(HealthLog::new()),
            Arc::new(ReplicationCoordinator::new_primary()),
            Arc::new(AllowAll),
        )
    }

    /// Clone of `state` with a different auth session.
    pub fn with_auth(state: &Arc<Self>, auth: Arc<dyn AuthSession>) -> Arc<Self> {
        Arc::new(Self {
            catalog: state.catalog.clone(),
            oplog: state.oplog.clone(),
            health: state.health.clone(),
            repl: state.repl.clone(),
            auth,
            feature_version: AtomicU32::new(state.feature_version()),
        })
    }

    pub fn feature_version(&self) -> u32 {
        self.feature_version.load(Ordering::Relaxed)
    }

    pub fn set_feature_version(&self, version: u32) {
        self.feature_version.store(version, Ordering::Relaxed);
    }
}
