//! Cluster-assigned resource versions.
//!
//! A resource version is opaque: the only guarantee a cluster gives is that
//! it changes on every write. Clusters that hand out decimal counters (the
//! common case) also make them comparable, which the storage engine uses to
//! refuse replays of older state.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_counter(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Compares two versions when both are decimal counters.
    ///
    /// Returns `None` when either side is not numeric; callers must then
    /// fall back to equality.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self.as_counter(), other.as_counter()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }

    /// True only when both versions are comparable and `self` is strictly older.
    pub fn is_older_than(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}
