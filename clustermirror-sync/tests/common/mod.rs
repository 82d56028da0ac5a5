//! Shared fixtures for sync tests.

#![allow(dead_code)]

use clustermirror_storage::{CollectionRegistry, ListOptions, ResourceStorage, SqliteStorageFactory, StorageFactory};
use clustermirror_sync::{BackoffConfig, SyncObserver, SynchroConfig};
use clustermirror_types::{ApiResource, GroupVersionResource, Scheme};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn deployments() -> ApiResource {
    ApiResource::new(GroupVersionResource::new("apps", "v1", "deployments"), "Deployment", true)
}

pub fn pods() -> ApiResource {
    ApiResource::new(GroupVersionResource::new("", "v1", "pods"), "Pod", true)
}

pub fn make_factory() -> Arc<SqliteStorageFactory> {
    Arc::new(SqliteStorageFactory::in_memory(Arc::new(Scheme::default()), CollectionRegistry::new()).unwrap())
}

pub fn make_storage(factory: &SqliteStorageFactory, resource: &ApiResource) -> Arc<dyn ResourceStorage> {
    factory
        .new_resource_storage(Scheme::default().resource_config(resource))
        .unwrap()
}

/// Short delays so retry paths run within a test.
pub fn fast_config() -> SynchroConfig {
    SynchroConfig {
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            reset_after: Duration::from_secs(1),
        },
        write_retries: 1,
        write_retry_delay: Duration::from_millis(1),
        list_page_size: 2,
        shutdown_timeout: Duration::from_secs(2),
        tombstone_retention: Duration::from_secs(3600),
        purge_interval: Duration::ZERO,
    }
}

pub fn make_object(namespace: &str, name: &str, replicas: u64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"replicas": replicas},
    })
}

pub fn make_pod(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": namespace},
    })
}

pub async fn list_names(storage: &Arc<dyn ResourceStorage>, cluster: &str) -> Vec<String> {
    storage
        .list(&ListOptions::for_cluster(cluster))
        .await
        .unwrap()
        .items
        .iter()
        .map(|o| o["metadata"]["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl AsyncFnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Observer that records every notification as a line of text.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }
}

impl SyncObserver for RecordingObserver {
    fn resource_enabled(&self, cluster: &str, resource: &ApiResource) {
        self.events.lock().unwrap().push(format!("enabled {cluster} {}", resource.gvr));
    }

    fn resource_disabled(&self, cluster: &str, gvr: &GroupVersionResource) {
        self.events.lock().unwrap().push(format!("disabled {cluster} {gvr}"));
    }

    fn cluster_removed(&self, cluster: &str) {
        self.events.lock().unwrap().push(format!("removed {cluster}"));
    }
}
