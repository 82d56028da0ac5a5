use clustermirror_types::{ApiResource, GroupVersionResource};

/// Receives enablement changes from cluster workers.
///
/// A kind is enabled once its first full list has been persisted and is
/// disabled before its records are purged, so readers never observe an
/// enabled kind with missing data.
pub trait SyncObserver: Send + Sync {
    fn resource_enabled(&self, cluster: &str, resource: &ApiResource);

    fn resource_disabled(&self, cluster: &str, gvr: &GroupVersionResource);

    fn cluster_removed(&self, cluster: &str);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn resource_enabled(&self, _cluster: &str, _resource: &ApiResource) {}

    fn resource_disabled(&self, _cluster: &str, _gvr: &GroupVersionResource) {}

    fn cluster_removed(&self, _cluster: &str) {}
}
