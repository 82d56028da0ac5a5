//! An in-memory cluster for testing.
//!
//! Objects live in a map per served resource. Every mutation bumps a
//! cluster-wide resource version and is fanned out to open watches, unless
//! applied with one of the `*_quietly` methods, which model changes that
//! happen while no watch is connected.

use super::{ClusterClient, ListPage, WatchEvent, WatchStream};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use clustermirror_types::{object_key, ApiResource, GroupVersionResource, ResourceVersion};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MockResource {
    objects: BTreeMap<String, Value>,
    watchers: Vec<UnboundedSender<SyncResult<WatchEvent>>>,
}

#[derive(Default)]
struct MockState {
    served: HashMap<GroupVersionResource, ApiResource>,
    resources: HashMap<GroupVersionResource, MockResource>,
    resource_version: u64,
    failing_lists: usize,
    panic_on_list: bool,
    panic_on_discover: bool,
    list_calls: usize,
    watch_calls: usize,
}

/// A scripted member cluster.
#[derive(Default)]
pub struct MockClusterClient {
    state: Mutex<MockState>,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `resource` discoverable and listable.
    pub fn serve(&self, resource: ApiResource) {
        let mut state = self.lock();
        state.resources.entry(resource.gvr.clone()).or_default();
        state.served.insert(resource.gvr.clone(), resource);
    }

    /// Creates or replaces an object and notifies watchers. Returns the
    /// stored object with its new resource version.
    pub fn apply(&self, gvr: &GroupVersionResource, object: Value) -> Value {
        self.write(gvr, object, true)
    }

    /// Like [`apply`](Self::apply) but without a watch event.
    pub fn apply_quietly(&self, gvr: &GroupVersionResource, object: Value) -> Value {
        self.write(gvr, object, false)
    }

    /// Deletes an object and notifies watchers.
    pub fn delete(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Option<Value> {
        self.remove(gvr, namespace, name, true)
    }

    /// Like [`delete`](Self::delete) but without a watch event.
    pub fn delete_quietly(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Option<Value> {
        self.remove(gvr, namespace, name, false)
    }

    /// Sends a bookmark at the current resource version to open watches.
    pub fn bookmark(&self, gvr: &GroupVersionResource) {
        let mut state = self.lock();
        let rv = ResourceVersion::new(state.resource_version.to_string());
        if let Some(resource) = state.resources.get_mut(gvr) {
            broadcast(resource, WatchEvent::Bookmark(rv));
        }
    }

    /// Fails open watches with an expired-cursor error and drops them.
    pub fn expire_watches(&self, gvr: &GroupVersionResource) {
        let mut state = self.lock();
        if let Some(resource) = state.resources.get_mut(gvr) {
            for watcher in resource.watchers.drain(..) {
                let _ = watcher.unbounded_send(Err(SyncError::Expired("too old resource version".into())));
            }
        }
    }

    /// Ends open watches cleanly, as a server-side timeout would.
    pub fn close_watches(&self, gvr: &GroupVersionResource) {
        if let Some(resource) = self.lock().resources.get_mut(gvr) {
            resource.watchers.clear();
        }
    }

    /// The next `n` list calls fail with a transient error.
    pub fn fail_next_lists(&self, n: usize) {
        self.lock().failing_lists = n;
    }

    pub fn set_panic_on_list(&self, panic: bool) {
        self.lock().panic_on_list = panic;
    }

    pub fn set_panic_on_discover(&self, panic: bool) {
        self.lock().panic_on_discover = panic;
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn watch_calls(&self) -> usize {
        self.lock().watch_calls
    }

    /// Number of watches still connected for `gvr`.
    pub fn active_watches(&self, gvr: &GroupVersionResource) -> usize {
        self.lock()
            .resources
            .get_mut(gvr)
            .map(|r| {
                r.watchers.retain(|w| !w.is_closed());
                r.watchers.len()
            })
            .unwrap_or_default()
    }

    fn write(&self, gvr: &GroupVersionResource, mut object: Value, notify: bool) -> Value {
        let mut state = self.lock();
        state.resource_version += 1;
        let rv = state.resource_version.to_string();

        let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) else {
            return object;
        };
        metadata.insert("resourceVersion".into(), json!(rv));
        if !metadata.contains_key("uid") {
            metadata.insert("uid".into(), json!(uuid::Uuid::new_v4().to_string()));
        }
        let namespace = metadata.get("namespace").and_then(Value::as_str).unwrap_or_default();
        let name = metadata.get("name").and_then(Value::as_str).unwrap_or_default();
        let key = object_key(namespace, name);

        let resource = state.resources.entry(gvr.clone()).or_default();
        let previous = resource.objects.insert(key, object.clone());
        if notify {
            let event = if previous.is_some() {
                WatchEvent::Modified(object.clone())
            } else {
                WatchEvent::Added(object.clone())
            };
            broadcast(resource, event);
        }
        object
    }

    fn remove(&self, gvr: &GroupVersionResource, namespace: &str, name: &str, notify: bool) -> Option<Value> {
        let mut state = self.lock();
        state.resource_version += 1;
        let rv = state.resource_version.to_string();
        let resource = state.resources.get_mut(gvr)?;
        let mut object = resource.objects.remove(&object_key(namespace, name))?;
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".into(), json!(rv));
        }
        if notify {
            broadcast(resource, WatchEvent::Deleted(object.clone()));
        }
        Some(object)
    }
}

fn broadcast(resource: &mut MockResource, event: WatchEvent) {
    resource
        .watchers
        .retain(|w| w.unbounded_send(Ok(event.clone())).is_ok());
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn discover(&self, gvr: &GroupVersionResource) -> SyncResult<Option<ApiResource>> {
        let (panic, served) = {
            let state = self.lock();
            (state.panic_on_discover, state.served.get(gvr).cloned())
        };
        if panic {
            panic!("mock cluster discovery panicked");
        }
        Ok(served)
    }

    async fn list(
        &self,
        gvr: &GroupVersionResource,
        limit: Option<usize>,
        continue_token: Option<&str>,
    ) -> SyncResult<ListPage> {
        let page = {
            let mut state = self.lock();
            state.list_calls += 1;
            if state.panic_on_list {
                None
            } else if state.failing_lists > 0 {
                state.failing_lists -= 1;
                return Err(SyncError::Transient("mock list failure".into()));
            } else {
                let rv = ResourceVersion::new(state.resource_version.to_string());
                let resource = state
                    .resources
                    .get(gvr)
                    .ok_or_else(|| SyncError::NotServed(gvr.to_string()))?;
                let offset: usize = continue_token.and_then(|t| t.parse().ok()).unwrap_or_default();
                let limit = limit.unwrap_or(usize::MAX);
                let items: Vec<Value> = resource.objects.values().skip(offset).take(limit).cloned().collect();
                let next = offset.saturating_add(items.len());
                Some(ListPage {
                    continue_token: (next < resource.objects.len()).then(|| next.to_string()),
                    items,
                    resource_version: rv,
                })
            }
        };
        match page {
            Some(page) => Ok(page),
            None => panic!("mock cluster list panicked"),
        }
    }

    async fn watch(&self, gvr: &GroupVersionResource, _resource_version: &ResourceVersion) -> SyncResult<WatchStream> {
        let mut state = self.lock();
        state.watch_calls += 1;
        let resource = state
            .resources
            .get_mut(gvr)
            .ok_or_else(|| SyncError::NotServed(gvr.to_string()))?;
        let (tx, rx) = unbounded();
        resource.watchers.push(tx);
        Ok(rx.boxed())
    }
}
