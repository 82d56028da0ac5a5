//! The list-then-watch loop for one (cluster, kind).
//!
//! ```text
//! Initializing -> Listing -> Watching
//!                   ^           |
//!                   +- Error <--+
//! ```
//!
//! `Stopped` is entered from any phase on cancellation. Cancellation is only
//! observed between writes, so at most one in-flight write completes after
//! the token fires.

use crate::backoff::Backoff;
use crate::client::{ClusterClient, WatchEvent};
use crate::config::SynchroConfig;
use crate::error::SyncResult;
use crate::observer::SyncObserver;
use crate::status::{StatusBoard, SynchroStatus};
use clustermirror_storage::{ResourceStorage, StorageError, StorageFactory, StorageResult, UpsertOutcome};
use clustermirror_types::{ApiResource, GroupVersionResource, ObjectMeta, ResourceVersion};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every kind of one cluster.
#[derive(Clone)]
pub(crate) struct SynchroContext {
    pub cluster: String,
    pub client: Arc<dyn ClusterClient>,
    pub factory: Arc<dyn StorageFactory>,
    pub observer: Arc<dyn SyncObserver>,
    pub statuses: Arc<StatusBoard>,
    pub config: SynchroConfig,
}

pub(crate) struct ResourceSynchro {
    ctx: SynchroContext,
    resource: ApiResource,
    /// Key of this kind's rows in the cursor map.
    storage_gvr: GroupVersionResource,
    storage: Arc<dyn ResourceStorage>,
    /// Object key -> last persisted resource version.
    known: HashMap<String, ResourceVersion>,
    cursor_loaded: bool,
    published: bool,
}

/// Retries `op` while it fails with an internal storage error.
async fn retry_write<T, F, Fut>(retries: u32, delay: Duration, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err @ StorageError::Internal { .. }) if attempt < retries => {
                attempt += 1;
                warn!(attempt, error = %err, "Storage write failed, retrying");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

fn non_empty(rv: ResourceVersion) -> Option<ResourceVersion> {
    (!rv.is_empty()).then_some(rv)
}

impl ResourceSynchro {
    pub(crate) fn new(ctx: SynchroContext, resource: ApiResource, storage: Arc<dyn ResourceStorage>) -> Self {
        let storage_gvr = storage.config().storage_gvr();
        Self {
            ctx,
            resource,
            storage_gvr,
            storage,
            known: HashMap::new(),
            cursor_loaded: false,
            published: false,
        }
    }

    fn gvr(&self) -> &GroupVersionResource {
        &self.resource.gvr
    }

    fn set_status(&self, status: SynchroStatus) {
        self.ctx.statuses.set(&self.resource.gvr, status);
    }

    /// Runs until `cancel` fires. Failures never end the loop: they move the
    /// kind to `Error` and back to `Listing` after a backoff delay.
    pub(crate) async fn run(mut self, cancel: CancellationToken, start_delay: Duration) {
        // A restart keeps the previous error visible while it waits.
        if !start_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_status(SynchroStatus::Stopped);
                    return;
                }
                _ = tokio::time::sleep(start_delay) => {}
            }
        }

        let mut backoff = Backoff::new(self.ctx.config.backoff.clone());
        loop {
            match self.sync(&cancel, &mut backoff).await {
                Ok(()) => break,
                Err(err) => {
                    if err.is_transient() {
                        warn!(cluster = %self.ctx.cluster, resource = %self.gvr(), error = %err, "Synchronization interrupted");
                    } else {
                        error!(cluster = %self.ctx.cluster, resource = %self.gvr(), error = %err, "Synchronization failed");
                    }
                    self.set_status(SynchroStatus::Error {
                        reason: err.to_string(),
                    });
                    let delay = backoff.next_delay();
                    debug!(cluster = %self.ctx.cluster, resource = %self.gvr(), delay_ms = delay.as_millis() as u64, "Backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_status(SynchroStatus::Stopped);
        info!(cluster = %self.ctx.cluster, resource = %self.gvr(), "Resource synchro stopped");
    }

    /// One pass of the state machine. `Ok` only on cancellation.
    async fn sync(&mut self, cancel: &CancellationToken, backoff: &mut Backoff) -> SyncResult<()> {
        if !self.cursor_loaded {
            self.set_status(SynchroStatus::Initializing);
            let mut versions = self.ctx.factory.resource_versions(&self.ctx.cluster).await?;
            self.known = versions.remove(&self.storage_gvr).unwrap_or_default();
            self.cursor_loaded = true;
            debug!(cluster = %self.ctx.cluster, resource = %self.gvr(), known = self.known.len(), "Loaded cursor map");
        }

        self.set_status(SynchroStatus::Listing);
        let Some(mut resource_version) = self.list(cancel).await? else {
            return Ok(());
        };
        backoff.record_success();

        self.set_status(SynchroStatus::Watching);
        if !self.published {
            self.ctx.observer.resource_enabled(&self.ctx.cluster, &self.resource);
            self.published = true;
        }

        let gvr = self.gvr().clone();
        loop {
            let mut events = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                watch = self.ctx.client.watch(&gvr, &resource_version) => watch?,
            };
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    event = events.next() => event,
                };
                match event {
                    None => {
                        debug!(cluster = %self.ctx.cluster, resource = %gvr, %resource_version, "Watch closed, re-watching");
                        break;
                    }
                    Some(Err(err)) => return Err(err),
                    Some(Ok(event)) => {
                        backoff.record_success();
                        if let Some(rv) = self.apply(event).await? {
                            resource_version = rv;
                        }
                    }
                }
            }
        }
    }

    /// Enumerates the kind, upserts changed objects and deletes objects the
    /// cursor map has but the cluster no longer does. Returns the collection
    /// resource version to watch from, or `None` if cancelled.
    async fn list(&mut self, cancel: &CancellationToken) -> SyncResult<Option<ResourceVersion>> {
        let gvr = self.gvr().clone();
        let page_size = (self.ctx.config.list_page_size > 0).then_some(self.ctx.config.list_page_size);
        let mut seen = HashSet::new();
        let mut continue_token: Option<String> = None;
        let (mut written, mut unchanged) = (0usize, 0usize);

        let resource_version = loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                page = self.ctx.client.list(&gvr, page_size, continue_token.as_deref()) => page?,
            };

            for item in &page.items {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                let Some(meta) = self.object_meta(item) else {
                    continue;
                };
                let key = meta.key();
                seen.insert(key.clone());
                if self.known.get(&key) == Some(&meta.resource_version) {
                    unchanged += 1;
                    continue;
                }
                if self.upsert(item, meta).await? {
                    written += 1;
                }
            }

            match page.continue_token {
                Some(token) => continue_token = Some(token),
                None => break page.resource_version,
            }
        };

        let missing: Vec<String> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in &missing {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            self.delete_missing(key).await?;
        }

        info!(
            cluster = %self.ctx.cluster,
            resource = %gvr,
            written,
            unchanged,
            deleted = missing.len(),
            %resource_version,
            "List reconciled"
        );
        Ok(Some(resource_version))
    }

    /// Applies one watch event. Returns the resource version it carried.
    async fn apply(&mut self, event: WatchEvent) -> SyncResult<Option<ResourceVersion>> {
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => {
                let Some(meta) = self.object_meta(&object) else {
                    return Ok(None);
                };
                let rv = meta.resource_version.clone();
                self.upsert(&object, meta).await?;
                Ok(non_empty(rv))
            }
            WatchEvent::Deleted(object) => {
                let Some(meta) = self.object_meta(&object) else {
                    return Ok(None);
                };
                let rv = meta.resource_version.clone();
                self.delete(&object, meta).await?;
                Ok(non_empty(rv))
            }
            WatchEvent::Bookmark(rv) => Ok(non_empty(rv)),
        }
    }

    fn object_meta(&self, object: &Value) -> Option<ObjectMeta> {
        match ObjectMeta::from_object(object) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(cluster = %self.ctx.cluster, resource = %self.gvr(), error = %err, "Skipping malformed object");
                None
            }
        }
    }

    /// Returns whether storage changed (anything but a refresh).
    async fn upsert(&mut self, object: &Value, meta: ObjectMeta) -> SyncResult<bool> {
        let key = meta.key();
        let config = &self.ctx.config;
        let result = retry_write(config.write_retries, config.write_retry_delay, || {
            self.storage.upsert(&self.ctx.cluster, object)
        })
        .await;

        match result {
            Ok(outcome) => {
                debug!(cluster = %self.ctx.cluster, resource = %self.gvr(), key = %key, ?outcome, "Upserted object");
                self.known.insert(key, meta.resource_version);
                Ok(outcome != UpsertOutcome::Refreshed)
            }
            Err(err) if err.is_conflict() || err.is_unsupported() => {
                warn!(cluster = %self.ctx.cluster, resource = %self.gvr(), key = %key, error = %err, "Skipping object");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&mut self, object: &Value, meta: ObjectMeta) -> SyncResult<()> {
        let key = meta.key();
        let config = &self.ctx.config;
        let result = retry_write(config.write_retries, config.write_retry_delay, || {
            self.storage.mark_deleted(&self.ctx.cluster, object)
        })
        .await;

        match result {
            Ok(()) => {
                debug!(cluster = %self.ctx.cluster, resource = %self.gvr(), key = %key, "Marked object deleted");
                self.known.remove(&key);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                self.known.remove(&key);
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                warn!(cluster = %self.ctx.cluster, resource = %self.gvr(), key = %key, error = %err, "Skipping delete");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes an object that disappeared while no watch was connected.
    async fn delete_missing(&mut self, key: &str) -> SyncResult<()> {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key));
        let stub = json!({"metadata": {"namespace": namespace, "name": name}});
        let meta = ObjectMeta::from_object(&stub).map_err(|e| crate::SyncError::Decode(e.to_string()))?;
        self.delete(&stub, meta).await
    }
}
