//! Storage capability traits.
//!
//! Backends implement [`StorageFactory`]; everything above the storage layer
//! holds `Arc<dyn StorageFactory>` and the adapters it hands out.

use crate::query::{ListOptions, ObjectList};
use crate::record::{ClusterResourceCount, ResourceVersionMap, UpsertOutcome};
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clustermirror_types::{CollectionResource, GroupVersionResource, ResourceStorageConfig};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Per-kind read/write adapter.
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    fn config(&self) -> &ResourceStorageConfig;

    /// Inserts or replaces the object observed in `cluster`.
    async fn upsert(&self, cluster: &str, object: &Value) -> StorageResult<UpsertOutcome>;

    /// Records a delete observed in `cluster`; the row becomes a tombstone.
    async fn mark_deleted(&self, cluster: &str, object: &Value) -> StorageResult<()>;

    async fn get(&self, cluster: &str, namespace: &str, name: &str) -> StorageResult<Value>;

    async fn list(&self, opts: &ListOptions) -> StorageResult<ObjectList>;
}

/// A merged page of a collection resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionList {
    pub collection: CollectionResource,
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// Read adapter for one collection resource.
#[async_trait]
pub trait CollectionStorage: Send + Sync {
    fn collection(&self) -> &CollectionResource;

    async fn get(&self, opts: &ListOptions) -> StorageResult<CollectionList>;
}

#[async_trait]
pub trait StorageFactory: Send + Sync {
    /// Builds the adapter for one kind; fails when the backend cannot
    /// represent it.
    fn new_resource_storage(&self, config: ResourceStorageConfig) -> StorageResult<Arc<dyn ResourceStorage>>;

    /// Builds the adapter for a registered collection.
    fn new_collection_storage(&self, collection: &CollectionResource) -> StorageResult<Arc<dyn CollectionStorage>>;

    /// Snapshot of committed live resource versions for `cluster`.
    async fn resource_versions(&self, cluster: &str) -> StorageResult<ResourceVersionMap>;

    /// Hard-deletes every record of `cluster`. Returns the number removed.
    async fn purge_cluster(&self, cluster: &str) -> StorageResult<u64>;

    /// Hard-deletes every record of one kind in `cluster`.
    async fn purge_cluster_resource(&self, cluster: &str, gvr: &GroupVersionResource) -> StorageResult<u64>;

    /// Hard-deletes tombstones marked before `older_than`.
    async fn purge_tombstones(&self, older_than: DateTime<Utc>) -> StorageResult<u64>;

    async fn cluster_stats(&self) -> StorageResult<Vec<ClusterResourceCount>>;

    /// The static collection registry.
    fn collections(&self) -> Vec<CollectionResource>;
}
