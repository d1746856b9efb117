//! Turning a scrub invocation into an ordered run of per-collection jobs.

use crate::catalog::{Catalog, Namespace};
use crate::error::{ScourError, ScourResult};
use crate::key::RecordKey;

/// System collections that replicate and may therefore be scrubbed.
const REPLICATED_SYSTEM_COLLECTIONS: [&str; 7] = [
    "system.backup_users",
    "system.js",
    "system.new_users",
    "system.roles",
    "system.users",
    "system.version",
    "system.views",
];

/// Everything the worker needs to scrub one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionCheckInfo {
    pub ns: Namespace,
    pub start: RecordKey,
    pub end: RecordKey,
    pub max_count: u64,
    pub max_size: u64,
}

/// An ordered run of per-collection jobs, consumed once, in sequence.
pub type CheckRun = Vec<CollectionCheckInfo>;

/// Caller-supplied bounds for a single-collection scrub.
#[derive(Debug, Clone, Default)]
pub struct CheckBounds {
    pub min_key: Option<RecordKey>,
    pub max_key: Option<RecordKey>,
    pub max_count: Option<u64>,
    pub max_size: Option<u64>,
}

/// Whether a namespace is eligible for scrubbing.
///
/// The local database never replicates; system collections replicate only if
/// they are on the whitelist.
pub fn can_scour(ns: &Namespace) -> bool {
    if ns.is_local() {
        return false;
    }
    if ns.is_system() {
        return REPLICATED_SYSTEM_COLLECTIONS.contains(&ns.coll.as_str());
    }
    true
}

/// Plan a run over one collection.
pub fn plan_single(
    catalog: &Catalog,
    db: &str,
    coll: &str,
    bounds: CheckBounds,
) -> ScourResult<CheckRun> {
    let ns = Namespace::new(db, coll);

    if catalog.get(&ns).is_none() {
        return Err(ScourError::NamespaceNotFound(ns.to_string()));
    }
    if !can_scour(&ns) {
        return Err(ScourError::InvalidNamespace(ns.to_string()));
    }

    let start = bounds.min_key.unwrap_or_else(RecordKey::min);
    let end = bounds.max_key.unwrap_or_else(RecordKey::max);
    if start > end {
        return Err(ScourError::InvalidOptions(format!(
            "minKey {start} is above maxKey {end}"
        )));
    }

    Ok(vec![CollectionCheckInfo {
        ns,
        start,
        end,
        max_count: bounds.max_count.unwrap_or(u64::MAX),
        max_size: bounds.max_size.unwrap_or(u64::MAX),
    }])
}

/// Plan a full-range run over every eligible collection of `db`, in catalog
/// order.
pub fn plan_all(catalog: &Catalog, db: &str) -> ScourResult<CheckRun> {
    if db == "local" {
        return Err(ScourError::InvalidNamespace(db.to_string()));
    }

    let collections = catalog.collections_in_db(db);
    if collections.is_empty() {
        return Err(ScourError::NamespaceNotFound(format!("database {db}")));
    }

    Ok(collections
        .into_iter()
        .filter(|coll| can_scour(coll.ns()))
        .map(|coll| CollectionCheckInfo {
            ns: coll.ns().clone(),
            start: RecordKey::min(),
            end: RecordKey::max(),
            max_count: u64::MAX,
            max_size: u64::MAX,
        })
        .collect())
}
