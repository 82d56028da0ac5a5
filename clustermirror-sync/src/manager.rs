//! Supervision of cluster workers.
//!
//! The manager keeps exactly one [`ClusterSynchro`] per registered cluster.
//! Registry changes are funnelled through a deduplicating queue drained by
//! `concurrency` reconcile tasks, so a slow teardown of one cluster does not
//! hold up the others. Worker panics are caught and the worker is restarted
//! after a backoff delay. While running, the manager also drops tombstones
//! older than the configured retention.

use crate::client::ClusterClient;
use crate::cluster_synchro::{ClusterSynchro, ClusterSynchroHandle};
use crate::config::SynchroConfig;
use crate::observer::SyncObserver;
use crate::panic_message;
use crate::queue::WorkQueue;
use crate::registry::{ClusterRegistry, ClusterSpec};
use crate::status::SynchroStatus;
use chrono::{DateTime, Utc};
use clustermirror_storage::StorageFactory;
use clustermirror_types::{GroupVersionResource, Scheme};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Worker {
    handle: ClusterSynchroHandle,
    client: Arc<dyn ClusterClient>,
    resources: Vec<GroupVersionResource>,
    restarts: u32,
    crashed: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl Worker {
    fn is_live(&self) -> bool {
        !self.crashed.load(Ordering::Acquire) && !self.join.is_finished()
    }
}

struct ManagerInner {
    registry: Arc<ClusterRegistry>,
    factory: Arc<dyn StorageFactory>,
    scheme: Arc<Scheme>,
    observer: Arc<dyn SyncObserver>,
    config: SynchroConfig,
    workers: Mutex<HashMap<String, Worker>>,
}

/// Runs cluster workers while told to.
///
/// The manager performs no leader election; [`run`](Self::run) is started
/// and cancelled by the caller, typically through a
/// [`LeaderGate`](crate::LeaderGate).
#[derive(Clone)]
pub struct SynchroManager {
    inner: Arc<ManagerInner>,
}

impl SynchroManager {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        factory: Arc<dyn StorageFactory>,
        scheme: Arc<Scheme>,
        observer: Arc<dyn SyncObserver>,
        config: SynchroConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                factory,
                scheme,
                observer,
                config,
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Per cluster, the phase of every mirrored kind.
    pub fn statuses(&self) -> BTreeMap<String, BTreeMap<GroupVersionResource, SynchroStatus>> {
        self.inner
            .workers()
            .iter()
            .map(|(name, worker)| (name.clone(), worker.handle.status()))
            .collect()
    }

    /// Names of clusters with a live worker.
    pub fn running_clusters(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .workers()
            .iter()
            .filter(|(_, w)| w.is_live())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Blocks until `stop` fires, keeping one worker per registered cluster.
    /// Returns once every worker has stopped or been aborted.
    pub async fn run(&self, concurrency: usize, stop: CancellationToken) {
        let concurrency = concurrency.max(1);
        info!(concurrency, "Synchro manager started");

        let queue = Arc::new(WorkQueue::default());
        let mut events = self.inner.registry.subscribe();
        for name in self.inner.registry.names() {
            queue.add(&name);
        }

        let reconcilers: Vec<_> = (0..concurrency)
            .map(|_| {
                let inner = Arc::clone(&self.inner);
                let queue = Arc::clone(&queue);
                let stop = stop.clone();
                tokio::spawn(async move {
                    while let Some(name) = queue.get().await {
                        inner.reconcile(&name, &queue, &stop).await;
                        queue.done(&name);
                    }
                })
            })
            .collect();

        let janitor = tokio::spawn(purge_tombstones_periodically(
            Arc::clone(&self.inner.factory),
            self.inner.config.tombstone_retention,
            self.inner.config.purge_interval,
            stop.clone(),
        ));

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => queue.add(event.cluster()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Registry events lagged, resynchronizing every cluster");
                        for name in self.inner.registry.names() {
                            queue.add(&name);
                        }
                        let running: Vec<_> = self.inner.workers().keys().cloned().collect();
                        for name in running {
                            queue.add(&name);
                        }
                    }
                    Err(RecvError::Closed) => {
                        stop.cancelled().await;
                        break;
                    }
                },
            }
        }

        queue.shut_down();
        join_all(reconcilers).await;
        let _ = janitor.await;

        let workers: Vec<(String, Worker)> = self.inner.workers().drain().collect();
        let shutdown_timeout = self.inner.config.shutdown_timeout;
        join_all(
            workers
                .into_iter()
                .map(|(name, worker)| stop_worker(name, worker, shutdown_timeout)),
        )
        .await;
        info!("Synchro manager stopped");
    }
}

/// Drops tombstones older than `retention` every `every` until `stop`.
async fn purge_tombstones_periodically(
    factory: Arc<dyn StorageFactory>,
    retention: Duration,
    every: Duration,
    stop: CancellationToken,
) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(cutoff) = tombstone_cutoff(retention) else {
            continue;
        };
        match factory.purge_tombstones(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged expired tombstones"),
            Err(err) => warn!(error = %err, "Failed to purge tombstones"),
        }
        match factory.cluster_stats().await {
            Ok(stats) => {
                for entry in stats {
                    debug!(cluster = %entry.cluster, resource = %entry.gvr, count = entry.count, "Mirrored objects");
                }
            }
            Err(err) => warn!(error = %err, "Failed to read storage stats"),
        }
    }
}

/// `None` when the retention reaches before the representable range.
fn tombstone_cutoff(retention: Duration) -> Option<DateTime<Utc>> {
    let retention = chrono::Duration::from_std(retention).ok()?;
    Utc::now().checked_sub_signed(retention)
}

/// Cancels a worker and waits for it, aborting it after `limit`.
async fn stop_worker(name: String, worker: Worker, limit: Duration) {
    worker.handle.stop();
    let abort = worker.join.abort_handle();
    match timeout(limit, worker.join).await {
        Ok(_) => {}
        Err(_) => {
            error!(cluster = %name, "Cluster synchro failed to stop in time, aborting");
            abort.abort();
        }
    }
}

impl ManagerInner {
    fn workers(&self) -> MutexGuard<'_, HashMap<String, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Brings the worker for `name` in line with the registry.
    async fn reconcile(self: &Arc<Self>, name: &str, queue: &Arc<WorkQueue>, stop: &CancellationToken) {
        let desired = self.registry.get(name);
        let existing = self.workers().remove(name);

        match (desired, existing) {
            (None, None) => {}
            (None, Some(worker)) => {
                stop_worker(name.to_string(), worker, self.config.shutdown_timeout).await;
                self.observer.cluster_removed(name);
                match self.factory.purge_cluster(name).await {
                    Ok(removed) => info!(cluster = %name, removed, "Cluster removed"),
                    Err(err) => error!(cluster = %name, error = %err, "Failed to purge removed cluster"),
                }
            }
            (Some(spec), None) => self.spawn_worker(spec, 0, queue, stop),
            (Some(spec), Some(worker)) => {
                if !Arc::ptr_eq(&worker.client, &spec.client) {
                    info!(cluster = %name, "Cluster connection changed, restarting worker");
                    stop_worker(name.to_string(), worker, self.config.shutdown_timeout).await;
                    self.spawn_worker(spec, 0, queue, stop);
                } else if !worker.is_live() {
                    let restarts = worker.restarts.saturating_add(1);
                    info!(cluster = %name, restarts, "Restarting crashed cluster synchro");
                    stop_worker(name.to_string(), worker, self.config.shutdown_timeout).await;
                    self.spawn_worker(spec, restarts, queue, stop);
                } else {
                    let mut worker = worker;
                    if worker.resources != spec.resources {
                        if let Err(err) = worker.handle.set_resources(spec.resources.clone()) {
                            warn!(cluster = %name, error = %err, "Failed to update cluster resources");
                        }
                        worker.resources = spec.resources;
                    }
                    self.workers().insert(name.to_string(), worker);
                }
            }
        }
    }

    fn spawn_worker(
        self: &Arc<Self>,
        spec: ClusterSpec,
        restarts: u32,
        queue: &Arc<WorkQueue>,
        stop: &CancellationToken,
    ) {
        if stop.is_cancelled() {
            return;
        }
        let synchro = ClusterSynchro::new(
            spec.name.clone(),
            Arc::clone(&spec.client),
            Arc::clone(&self.factory),
            Arc::clone(&self.scheme),
            Arc::clone(&self.observer),
            self.config.clone(),
        );
        let token = stop.child_token();
        let (handle, run) = synchro.start(spec.resources.clone(), token.clone());

        let name = spec.name.clone();
        let queue = Arc::clone(queue);
        let retry_delay = self.config.backoff.delay(restarts);
        let crashed = Arc::new(AtomicBool::new(false));
        let crash_flag = Arc::clone(&crashed);
        let join = tokio::spawn(async move {
            if let Err(payload) = AssertUnwindSafe(run).catch_unwind().await {
                crash_flag.store(true, Ordering::Release);
                error!(
                    cluster = %name,
                    reason = %panic_message(payload.as_ref()),
                    restart_in_ms = retry_delay.as_millis() as u64,
                    "Cluster synchro panicked"
                );
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(retry_delay) => queue.add(&name),
                }
            }
        });

        info!(cluster = %spec.name, resources = spec.resources.len(), restarts, "Cluster synchro spawned");
        self.workers().insert(
            spec.name,
            Worker {
                handle,
                client: spec.client,
                resources: spec.resources,
                restarts,
                crashed,
                join,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_lies_retention_in_the_past() {
        let cutoff = tombstone_cutoff(Duration::from_secs(60)).unwrap();
        let age = Utc::now() - cutoff;
        assert!(age >= chrono::Duration::seconds(60) && age < chrono::Duration::seconds(70));
    }

    #[test]
    fn unrepresentable_retention_has_no_cutoff() {
        assert!(tombstone_cutoff(Duration::MAX).is_none());
    }
}
