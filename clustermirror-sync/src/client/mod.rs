//! Remote cluster access.
//!
//! Cluster workers talk to a member cluster only through [`ClusterClient`],
//! so the list/watch machinery can run against the HTTP implementation or
//! the in-memory [`mock`] one.

pub mod http;
pub mod mock;

use crate::error::SyncResult;
use async_trait::async_trait;
use clustermirror_types::{ApiResource, GroupVersionResource, ResourceVersion};
use futures::stream::BoxStream;
use serde_json::Value;

/// One page of a list call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<Value>,
    /// Collection resource version; a watch started from it sees every
    /// change after this page was produced.
    pub resource_version: ResourceVersion,
    pub continue_token: Option<String>,
}

/// A change notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Value),
    Modified(Value),
    Deleted(Value),
    /// Progress marker: no object changed, but the cursor may advance.
    Bookmark(ResourceVersion),
}

/// Stream of watch events. Server-side `ERROR` events arrive as `Err`
/// items; a 410 becomes [`SyncError::Expired`](crate::SyncError::Expired).
/// A clean end of stream means the server closed the watch.
pub type WatchStream = BoxStream<'static, SyncResult<WatchEvent>>;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resolves kind and scope of `gvr`. `None` when the cluster does not
    /// serve it.
    async fn discover(&self, gvr: &GroupVersionResource) -> SyncResult<Option<ApiResource>>;

    /// Lists one page of objects across all namespaces.
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        limit: Option<usize>,
        continue_token: Option<&str>,
    ) -> SyncResult<ListPage>;

    /// Watches changes newer than `resource_version`.
    async fn watch(&self, gvr: &GroupVersionResource, resource_version: &ResourceVersion) -> SyncResult<WatchStream>;
}
