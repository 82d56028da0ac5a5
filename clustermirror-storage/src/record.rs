//! Persisted record types.

use chrono::{DateTime, Utc};
use clustermirror_types::{GroupVersionResource, ResourceVersion};
use serde::Serialize;
use std::collections::HashMap;

/// Per cluster: kind -> object key -> last persisted resource version.
pub type ResourceVersionMap = HashMap<GroupVersionResource, HashMap<String, ResourceVersion>>;

/// One row of the `resources` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: i64,
    pub gvr: GroupVersionResource,
    pub kind: String,
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: ResourceVersion,
    /// Serialized object in its storage version.
    pub object: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    /// Set when a delete was observed; the row is then a tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the identity.
    Inserted,
    /// The row was replaced (new version or body, or a tombstone revived).
    Updated,
    /// Same version and body; only `synced_at` moved.
    Refreshed,
}

/// Live row count for one (cluster, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterResourceCount {
    pub cluster: String,
    pub gvr: GroupVersionResource,
    pub count: u64,
}
