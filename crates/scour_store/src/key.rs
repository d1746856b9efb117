//! Ordered record keys with whole-domain sentinels.
//!
//! A scrub batch is described by two `RecordKey` boundaries. `MinKey` sorts
//! below every real key and `MaxKey` above, so a boundary pair can name any
//! contiguous slice of a collection, including the full key range.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in a collection's key domain.
///
/// Real keys are raw bytes ordered lexicographically. The derived `Ord`
/// places `MinKey` below and `MaxKey` above every `Key` variant, which is
/// exactly the boundary ordering the batch chain relies on. The serde
/// encoding is externally tagged, so the sentinels round-trip distinguishably
/// from any real key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    MinKey,
    Key(Vec<u8>),
    MaxKey,
}

impl RecordKey {
    /// The boundary below every real key.
    pub const fn min() -> Self {
        RecordKey::MinKey
    }

    /// The boundary above every real key.
    pub const fn max() -> Self {
        RecordKey::MaxKey
    }

    pub fn is_min(&self) -> bool {
        matches!(self, RecordKey::MinKey)
    }

    pub fn is_max(&self) -> bool {
        matches!(self, RecordKey::MaxKey)
    }

    /// Compare this boundary against a raw document key without allocating.
    pub fn cmp_bytes(&self, key: &[u8]) -> Ordering {
        match self {
            RecordKey::MinKey => Ordering::Less,
            RecordKey::Key(k) => k.as_slice().cmp(key),
            RecordKey::MaxKey => Ordering::Greater,
        }
    }
}

impl From<Vec<u8>> for RecordKey {
    fn from(key: Vec<u8>) -> Self {
        RecordKey::Key(key)
    }
}

impl From<&[u8]> for RecordKey {
    fn from(key: &[u8]) -> Self {
        RecordKey::Key(key.to_vec())
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        RecordKey::Key(key.as_bytes().to_vec())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::MinKey => write!(f, "$minKey"),
            RecordKey::Key(k) => write!(f, "{}", String::from_utf8_lossy(k)),
            RecordKey::MaxKey => write!(f, "$maxKey"),
        }
    }
}
