//! The Discovery Manager.
//!
//! Tracks which kinds are mirrored for which cluster, as reported by the
//! cluster workers through [`SyncObserver`], and renders the discovery
//! documents (`/api`, `/apis`, `/api/v1`, `/apis/{group}/{version}`) for
//! the mirrored set.

use clustermirror_sync::SyncObserver;
use clustermirror_types::{ApiResource, GroupVersion, GroupVersionResource};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Group of the built-in collection endpoint.
pub const COLLECTION_GROUP: &str = "clustermirror.io";
pub const COLLECTION_VERSION: &str = "v1alpha1";
pub const COLLECTION_RESOURCE: &str = "collectionresources";

type EnabledSet = BTreeMap<String, BTreeMap<GroupVersionResource, ApiResource>>;

#[derive(Debug, Default)]
pub struct DiscoveryManager {
    clusters: RwLock<EnabledSet>,
}

impl DiscoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, EnabledSet> {
        self.clusters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, EnabledSet> {
        self.clusters.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `gvr` is mirrored for `cluster`. An empty cluster asks
    /// whether any cluster mirrors it.
    pub fn enabled(&self, cluster: &str, gvr: &GroupVersionResource) -> bool {
        self.resource(cluster, gvr).is_some()
    }

    /// The mirrored description of `gvr` for `cluster`, with the same empty
    /// cluster meaning as [`enabled`](Self::enabled).
    pub fn resource(&self, cluster: &str, gvr: &GroupVersionResource) -> Option<ApiResource> {
        let clusters = self.read();
        if cluster.is_empty() {
            clusters.values().find_map(|kinds| kinds.get(gvr)).cloned()
        } else {
            clusters.get(cluster).and_then(|kinds| kinds.get(gvr)).cloned()
        }
    }

    /// Every mirrored kind, each listed once.
    pub fn resources(&self) -> Vec<ApiResource> {
        let mut merged = BTreeMap::new();
        for kinds in self.read().values() {
            for (gvr, resource) in kinds {
                merged.entry(gvr.clone()).or_insert_with(|| resource.clone());
            }
        }
        merged.into_values().collect()
    }

    fn group_versions(&self) -> BTreeSet<GroupVersion> {
        self.resources().iter().map(|r| r.gvr.group_version()).collect()
    }

    /// `/api`
    pub fn api_versions(&self) -> Value {
        let versions: Vec<String> = self
            .group_versions()
            .into_iter()
            .filter(|gv| gv.group.is_empty())
            .map(|gv| gv.version)
            .collect();
        json!({"kind": "APIVersions", "versions": versions})
    }

    /// `/apis`, including the collection group.
    pub fn api_groups(&self) -> Value {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for gv in self.group_versions().into_iter().filter(|gv| !gv.group.is_empty()) {
            groups.entry(gv.group).or_default().push(gv.version);
        }
        groups
            .entry(COLLECTION_GROUP.to_string())
            .or_default()
            .push(COLLECTION_VERSION.to_string());

        let groups: Vec<Value> = groups
            .into_iter()
            .map(|(group, versions)| {
                let versions: Vec<Value> = versions
                    .iter()
                    .map(|v| json!({"groupVersion": format!("{group}/{v}"), "version": v}))
                    .collect();
                let preferred = versions.first().cloned().unwrap_or(Value::Null);
                json!({"name": group, "versions": versions, "preferredVersion": preferred})
            })
            .collect();
        json!({"kind": "APIGroupList", "apiVersion": "v1", "groups": groups})
    }

    /// `/api/{version}` or `/apis/{group}/{version}`. `None` when nothing
    /// in that group version is mirrored.
    pub fn api_resources(&self, gv: &GroupVersion) -> Option<Value> {
        let resources: Vec<Value> = if gv.group == COLLECTION_GROUP && gv.version == COLLECTION_VERSION {
            vec![json!({
                "name": COLLECTION_RESOURCE,
                "kind": "CollectionResource",
                "namespaced": false,
                "verbs": ["get", "list"],
            })]
        } else {
            self.resources()
                .iter()
                .filter(|r| r.gvr.group_version() == *gv)
                .map(|r| {
                    json!({
                        "name": r.gvr.resource,
                        "kind": r.kind,
                        "namespaced": r.namespaced,
                        "verbs": ["get", "list"],
                    })
                })
                .collect()
        };
        if resources.is_empty() {
            return None;
        }
        Some(json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": gv.api_version(),
            "resources": resources,
        }))
    }
}

impl SyncObserver for DiscoveryManager {
    fn resource_enabled(&self, cluster: &str, resource: &ApiResource) {
        debug!(cluster = %cluster, resource = %resource.gvr, "Resource enabled");
        self.write()
            .entry(cluster.to_string())
            .or_default()
            .insert(resource.gvr.clone(), resource.clone());
    }

    fn resource_disabled(&self, cluster: &str, gvr: &GroupVersionResource) {
        debug!(cluster = %cluster, resource = %gvr, "Resource disabled");
        let mut clusters = self.write();
        if let Some(kinds) = clusters.get_mut(cluster) {
            kinds.remove(gvr);
            if kinds.is_empty() {
                clusters.remove(cluster);
            }
        }
    }

    fn cluster_removed(&self, cluster: &str) {
        debug!(cluster = %cluster, "Cluster removed from discovery");
        self.write().remove(cluster);
    }
}
