//! Collection catalog and document storage engines.
//!
//! This module provides the `CollectionEngine` abstraction, two engine
//! implementations (`MemEngine` in-memory and `FjallEngine` on-disk), the
//! `Collection` handle, and the `Catalog` that tracks collections per
//! database. The catalog's interior lock is the database-level shared lock
//! the scrubber holds while resolving collections and their neighbors.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use fjall::{Keyspace, PartitionCreateOptions};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ScourError, ScourResult};
use crate::key::RecordKey;

/// A fully qualified collection name, `db.coll`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    pub fn parse(s: &str) -> ScourResult<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(ScourError::InvalidOptions(format!(
                "expected db.coll namespace, got {s:?}"
            ))),
        }
    }

    /// The unreplicated node-local database.
    pub fn is_local(&self) -> bool {
        self.db == "local"
    }

    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl Serialize for Namespace {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Namespace::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Durable collection options reported in collection scrub records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    #[serde(default)]
    pub capped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
}

/// Index descriptor reported in collection scrub records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub key_pattern: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// The implicit primary-key index every collection carries.
    pub fn primary() -> Self {
        Self {
            name: "_id_".to_string(),
            key_pattern: "_id".to_string(),
            unique: true,
        }
    }
}

/// One document observed by a scan, in storage key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRecord {
    pub key: Vec<u8>,
    pub body: Vec<u8>,
}

/// The result of one bounded key-ordered scan.
///
/// `exhausted` is true when the scan ran off the requested range (past the
/// end boundary or out of documents) rather than stopping on a size hint.
/// The hasher uses it to tell a range-complete batch from a caps-limited one.
#[derive(Debug, Clone, Default)]
pub struct ScanChunk {
    pub docs: Vec<DocRecord>,
    pub exhausted: bool,
}

/// Ordered document storage for one collection.
///
/// `scan` materializes the documents a single batch will observe in one call,
/// which is what gives the batch its snapshot: documents are collected under
/// the engine's read lock and later mutations are not seen by that batch.
/// The hints are conservative over-fetch bounds; the scan may return at most
/// one document past `docs_hint` and one past `bytes_hint` so the caller can
/// detect that more data remains.
pub trait CollectionEngine: Send + Sync + 'static {
    fn insert(&self, key: Vec<u8>, body: Vec<u8>) -> anyhow::Result<()>;
    fn remove(&self, key: &[u8]) -> anyhow::Result<()>;
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
    fn scan(
        &self,
        from: &RecordKey,
        inclusive: bool,
        end: &RecordKey,
        docs_hint: u64,
        bytes_hint: u64,
    ) -> anyhow::Result<ScanChunk>;
    fn doc_count(&self) -> anyhow::Result<u64>;
}

fn lower_bound(from: &RecordKey, inclusive: bool) -> Option<Bound<Vec<u8>>> {
    match from {
        RecordKey::MinKey => Some(Bound::Unbounded),
        RecordKey::Key(k) if inclusive => Some(Bound::Included(k.clone())),
        RecordKey::Key(k) => Some(Bound::Excluded(k.clone())),
        // Nothing sorts above MaxKey.
        RecordKey::MaxKey => None,
    }
}

/// Shared chunk-collection logic for both engines.
fn collect_chunk(
    iter: impl Iterator<Item = anyhow::Result<(Vec<u8>, Vec<u8>)>>,
    end: &RecordKey,
    docs_hint: u64,
    bytes_hint: u64,
) -> anyhow::Result<ScanChunk> {
    let mut chunk = ScanChunk::default();
    let mut bytes = 0u64;

    for item in iter {
        let (key, body) = item?;
        if end.cmp_bytes(&key) == std::cmp::Ordering::Less {
            // Past the end boundary: the requested range is fully covered.
            chunk.exhausted = true;
            return Ok(chunk);
        }
        bytes = bytes.saturating_add(body.len() as u64);
        chunk.docs.push(DocRecord { key, body });
        if chunk.docs.len() as u64 > docs_hint || bytes > bytes_hint {
            return Ok(chunk);
        }
    }

    chunk.exhausted = true;
    Ok(chunk)
}

/// In-memory collection engine backed by an ordered map.
#[derive(Default)]
pub struct MemEngine {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CollectionEngine for MemEngine {
    fn insert(&self, key: Vec<u8>, body: Vec<u8>) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("collection lock poisoned"))?;
        guard.insert(key, body);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("collection lock poisoned"))?;
        guard.remove(key);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("collection lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn scan(
        &self,
        from: &RecordKey,
        inclusive: bool,
        end: &RecordKey,
        docs_hint: u64,
        bytes_hint: u64,
    ) -> anyhow::Result<ScanChunk> {
        let Some(lower) = lower_bound(from, inclusive) else {
            return Ok(ScanChunk {
                docs: Vec::new(),
                exhausted: true,
            });
        };
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("collection lock poisoned"))?;
        let iter = guard
            .range((lower, Bound::Unbounded))
            .map(|(k, v)| Ok((k.clone(), v.clone())));
        collect_chunk(iter, end, docs_hint, bytes_hint)
    }

    fn doc_count(&self) -> anyhow::Result<u64> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("collection lock poisoned"))?;
        Ok(guard.len() as u64)
    }
}

/// Fjall-backed collection engine, one partition per collection.
pub struct FjallEngine {
    partition: fjall::PartitionHandle,
}

impl FjallEngine {
    pub fn open(keyspace: &Keyspace, ns: &Namespace) -> anyhow::Result<Self> {
        let partition = keyspace
            .open_partition(&partition_name(ns), PartitionCreateOptions::default())
            .with_context(|| format!("open partition for {ns}"))?;
        Ok(Self { partition })
    }
}

fn partition_name(ns: &Namespace) -> String {
    // Partition names are restricted to a conservative character set.
    format!("coll_{}_{}", ns.db, ns.coll).replace('.', "_")
}

impl CollectionEngine for FjallEngine {
    fn insert(&self, key: Vec<u8>, body: Vec<u8>) -> anyhow::Result<()> {
        self.partition.insert(key, body).context("fjall insert")
    }

    fn remove(&self, key: &[u8]) -> anyhow::Result<()> {
        self.partition.remove(key).context("fjall remove")
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let value = self.partition.get(key).context("fjall get")?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn scan(
        &self,
        from: &RecordKey,
        inclusive: bool,
        end: &RecordKey,
        docs_hint: u64,
        bytes_hint: u64,
    ) -> anyhow::Result<ScanChunk> {
        let Some(lower) = lower_bound(from, inclusive) else {
            return Ok(ScanChunk {
                docs: Vec::new(),
                exhausted: true,
            });
        };
        let range: (Bound<Vec<u8>>, Bound<Vec<u8>>) = (lower, Bound::Unbounded);
        let iter = self.partition.range(range).map(|item| {
            let (key, body) = item.context("fjall range read")?;
            Ok((key.to_vec(), body.to_vec()))
        });
        collect_chunk(iter, end, docs_hint, bytes_hint)
    }

    fn doc_count(&self) -> anyhow::Result<u64> {
        let range: (Bound<Vec<u8>>, Bound<Vec<u8>>) = (Bound::Unbounded, Bound::Unbounded);
        let mut count = 0u64;
        for item in self.partition.range(range) {
            item.context("fjall range read")?;
            count += 1;
        }
        Ok(count)
    }
}

/// A read handle on one collection.
pub struct Collection {
    ns: Namespace,
    uuid: Uuid,
    options: CollectionOptions,
    indexes: Vec<IndexSpec>,
    engine: Box<dyn CollectionEngine>,
}

impl Collection {
    pub fn ns(&self) -> &Namespace {
        &self.ns
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn insert(&self, key: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> anyhow::Result<()> {
        self.engine.insert(key.into(), body.into())
    }

    pub fn remove(&self, key: &[u8]) -> anyhow::Result<()> {
        self.engine.remove(key)
    }

    pub fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    pub fn scan(
        &self,
        from: &RecordKey,
        inclusive: bool,
        end: &RecordKey,
        docs_hint: u64,
        bytes_hint: u64,
    ) -> anyhow::Result<ScanChunk> {
        self.engine.scan(from, inclusive, end, docs_hint, bytes_hint)
    }

    pub fn doc_count(&self) -> anyhow::Result<u64> {
        self.engine.doc_count()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("ns", &self.ns)
            .field("uuid", &self.uuid)
            .finish()
    }
}

enum CatalogBacking {
    Memory,
    Disk(Arc<Keyspace>),
}

/// Tracks every collection on the node.
///
/// The interior `RwLock` is the database-level shared catalog lock: readers
/// (including the scrub worker) take it shared, create/drop take it
/// exclusive.
pub struct Catalog {
    inner: RwLock<BTreeMap<Namespace, Arc<Collection>>>,
    backing: CatalogBacking,
}

impl Catalog {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            backing: CatalogBacking::Memory,
        }
    }

    /// Open a disk-backed catalog rooted at `dir`.
    pub fn open_disk(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let keyspace = fjall::Config::new(dir.as_ref())
            .open()
            .context("open fjall keyspace")?;
        Ok(Self {
            inner: RwLock::new(BTreeMap::new()),
            backing: CatalogBacking::Disk(Arc::new(keyspace)),
        })
    }

    pub fn create_collection(
        &self,
        ns: Namespace,
        options: CollectionOptions,
        indexes: Vec<IndexSpec>,
    ) -> anyhow::Result<Arc<Collection>> {
        let engine: Box<dyn CollectionEngine> = match &self.backing {
            CatalogBacking::Memory => Box::new(MemEngine::new()),
            CatalogBacking::Disk(keyspace) => Box::new(FjallEngine::open(keyspace, &ns)?),
        };
        let collection = Arc::new(Collection {
            ns: ns.clone(),
            uuid: Uuid::new_v4(),
            options,
            indexes,
            engine,
        });
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        if guard.contains_key(&ns) {
            anyhow::bail!("collection {ns} already exists");
        }
        guard.insert(ns, collection.clone());
        Ok(collection)
    }

    /// Drop a collection. Returns whether it existed.
    pub fn drop_collection(&self, ns: &Namespace) -> bool {
        match self.inner.write() {
            Ok(mut guard) => guard.remove(ns).is_some(),
            Err(_) => false,
        }
    }

    pub fn get(&self, ns: &Namespace) -> Option<Arc<Collection>> {
        self.inner.read().ok()?.get(ns).cloned()
    }

    /// Every collection in `db`, in catalog (name) order.
    pub fn collections_in_db(&self, db: &str) -> Vec<Arc<Collection>> {
        match self.inner.read() {
            Ok(guard) => guard
                .iter()
                .filter(|(ns, _)| ns.db == db)
                .map(|(_, coll)| coll.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Resolve a collection together with its UUID-order neighbors within the
    /// same database, under one shared acquisition of the catalog lock.
    ///
    /// Secondaries use the neighbor UUIDs to detect collections that exist on
    /// one node but not another.
    pub fn resolve_with_neighbors(
        &self,
        ns: &Namespace,
    ) -> Option<(Arc<Collection>, Option<Uuid>, Option<Uuid>)> {
        let guard = self.inner.read().ok()?;
        let collection = guard.get(ns)?.clone();

        let mut by_uuid: Vec<Uuid> = guard
            .iter()
            .filter(|(other, _)| other.db == ns.db)
            .map(|(_, coll)| coll.uuid)
            .collect();
        by_uuid.sort();

        let pos = by_uuid.iter().position(|u| *u == collection.uuid)?;
        let prev = if pos > 0 { Some(by_uuid[pos - 1]) } else { None };
        let next = by_uuid.get(pos + 1).copied();
        Some((collection, prev, next))
    }
}
