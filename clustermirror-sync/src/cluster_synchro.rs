//! The per-cluster worker.
//!
//! A cluster synchro owns one [`ResourceSynchro`] sub-loop per enabled kind.
//! Kinds are added and removed through [`ClusterSynchroHandle::set_resources`];
//! a removed kind is stopped, unpublished and then purged from storage.
//! A panicking sub-loop is restarted after a delay without touching the
//! other kinds of the cluster.

use crate::backoff::Backoff;
use crate::client::ClusterClient;
use crate::config::SynchroConfig;
use crate::error::{SyncError, SyncResult};
use crate::observer::SyncObserver;
use crate::panic_message;
use crate::resource_synchro::{ResourceSynchro, SynchroContext};
use crate::status::{StatusBoard, SynchroStatus};
use clustermirror_storage::StorageFactory;
use clustermirror_types::{ApiResource, GroupVersionResource, Scheme};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum Command {
    SetResources(Vec<GroupVersionResource>),
}

/// Control surface of a running cluster synchro.
#[derive(Debug, Clone)]
pub struct ClusterSynchroHandle {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    statuses: Arc<StatusBoard>,
    cancel: CancellationToken,
}

impl ClusterSynchroHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the set of kinds mirrored from this cluster.
    pub fn set_resources(&self, resources: Vec<GroupVersionResource>) -> SyncResult<()> {
        self.commands
            .send(Command::SetResources(resources))
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Current phase of every kind.
    pub fn status(&self) -> BTreeMap<GroupVersionResource, SynchroStatus> {
        self.statuses.snapshot()
    }

    /// Requests shutdown. Records are kept.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct KindWorker {
    resource: ApiResource,
    generation: u64,
    storage_gvr: GroupVersionResource,
    restarts: u32,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct KindExit {
    gvr: GroupVersionResource,
    generation: u64,
    panic: Option<String>,
}

struct KindSet {
    kinds: BTreeMap<GroupVersionResource, KindWorker>,
    /// Requested kinds not yet resolved through discovery.
    pending: BTreeSet<GroupVersionResource>,
    next_generation: u64,
    exits: mpsc::UnboundedSender<KindExit>,
    discovery_backoff: Backoff,
    retry_at: Option<Instant>,
}

pub struct ClusterSynchro {
    ctx: SynchroContext,
    scheme: Arc<Scheme>,
}

impl ClusterSynchro {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ClusterClient>,
        factory: Arc<dyn StorageFactory>,
        scheme: Arc<Scheme>,
        observer: Arc<dyn SyncObserver>,
        config: SynchroConfig,
    ) -> Self {
        Self {
            ctx: SynchroContext {
                cluster: name.into(),
                client,
                factory,
                observer,
                statuses: Arc::new(StatusBoard::default()),
                config,
            },
            scheme,
        }
    }

    /// Returns the control handle and the worker future. The future runs
    /// until `cancel` fires and must be spawned by the caller.
    pub fn start(
        self,
        resources: Vec<GroupVersionResource>,
        cancel: CancellationToken,
    ) -> (ClusterSynchroHandle, BoxFuture<'static, ()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = ClusterSynchroHandle {
            name: self.ctx.cluster.clone(),
            commands,
            statuses: Arc::clone(&self.ctx.statuses),
            cancel: cancel.clone(),
        };
        (handle, self.run(resources, receiver, cancel).boxed())
    }

    async fn run(
        self,
        initial: Vec<GroupVersionResource>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        info!(cluster = %self.ctx.cluster, resources = initial.len(), "Cluster synchro started");
        let (exits_tx, mut exits) = mpsc::unbounded_channel();
        let mut state = KindSet {
            kinds: BTreeMap::new(),
            pending: BTreeSet::new(),
            next_generation: 0,
            exits: exits_tx,
            discovery_backoff: Backoff::new(self.ctx.config.backoff.clone()),
            retry_at: None,
        };
        let outcome = AssertUnwindSafe(async {
            self.set_resources(&mut state, initial, &cancel).await;
            loop {
                let retry_at = state.retry_at.unwrap_or_else(Instant::now);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(Command::SetResources(resources)) => {
                            self.set_resources(&mut state, resources, &cancel).await;
                        }
                        None => break,
                    },
                    Some(exit) = exits.recv() => self.handle_exit(&mut state, exit, &cancel),
                    _ = tokio::time::sleep_until(retry_at), if state.retry_at.is_some() => {
                        self.discover_pending(&mut state, &cancel).await;
                    }
                }
            }
        })
        .catch_unwind()
        .await;

        // Kind loops must be gone before the worker reports an exit, panic or not.
        for worker in state.kinds.values() {
            worker.cancel.cancel();
        }
        for (_, worker) in std::mem::take(&mut state.kinds) {
            let _ = worker.handle.await;
        }
        match outcome {
            Ok(()) => info!(cluster = %self.ctx.cluster, "Cluster synchro stopped"),
            Err(payload) => {
                warn!(cluster = %self.ctx.cluster, "Cluster synchro unwound, resource synchros stopped");
                std::panic::resume_unwind(payload);
            }
        }
    }

    async fn set_resources(&self, state: &mut KindSet, desired: Vec<GroupVersionResource>, cancel: &CancellationToken) {
        let desired: BTreeSet<_> = desired.into_iter().collect();

        let dropped_pending: Vec<_> = state.pending.difference(&desired).cloned().collect();
        for gvr in dropped_pending {
            state.pending.remove(&gvr);
            self.ctx.statuses.remove(&gvr);
        }

        let disabled: Vec<_> = state.kinds.keys().filter(|g| !desired.contains(*g)).cloned().collect();
        for gvr in disabled {
            self.disable_kind(state, &gvr).await;
        }

        for gvr in desired {
            if !state.kinds.contains_key(&gvr) && state.pending.insert(gvr.clone()) {
                self.ctx.statuses.set(&gvr, SynchroStatus::Initializing);
            }
        }
        self.discover_pending(state, cancel).await;
    }

    /// Stops the kind's sub-loop, unpublishes it, then purges its records.
    async fn disable_kind(&self, state: &mut KindSet, gvr: &GroupVersionResource) {
        let Some(worker) = state.kinds.remove(gvr) else {
            return;
        };
        worker.cancel.cancel();
        let _ = worker.handle.await;

        self.ctx.observer.resource_disabled(&self.ctx.cluster, gvr);
        match self
            .ctx
            .factory
            .purge_cluster_resource(&self.ctx.cluster, &worker.storage_gvr)
            .await
        {
            Ok(removed) => info!(cluster = %self.ctx.cluster, resource = %gvr, removed, "Resource disabled"),
            Err(err) => warn!(cluster = %self.ctx.cluster, resource = %gvr, error = %err, "Failed to purge disabled resource"),
        }
        self.ctx.statuses.remove(gvr);
    }

    async fn discover_pending(&self, state: &mut KindSet, cancel: &CancellationToken) {
        let mut failed = false;
        let pending: Vec<_> = state.pending.iter().cloned().collect();
        for gvr in pending {
            if cancel.is_cancelled() {
                return;
            }
            match self.ctx.client.discover(&gvr).await {
                Ok(Some(resource)) => {
                    state.pending.remove(&gvr);
                    self.start_kind(state, resource, Duration::ZERO, 0, cancel);
                }
                Ok(None) => {
                    warn!(cluster = %self.ctx.cluster, resource = %gvr, "Resource not served by cluster");
                    self.ctx.statuses.set(
                        &gvr,
                        SynchroStatus::Error {
                            reason: SyncError::NotServed(gvr.to_string()).to_string(),
                        },
                    );
                    failed = true;
                }
                Err(err) => {
                    warn!(cluster = %self.ctx.cluster, resource = %gvr, error = %err, "Discovery failed");
                    self.ctx.statuses.set(&gvr, SynchroStatus::Error { reason: err.to_string() });
                    failed = true;
                }
            }
        }

        if failed {
            state.retry_at = Some(Instant::now() + state.discovery_backoff.next_delay());
        } else {
            state.discovery_backoff = Backoff::new(self.ctx.config.backoff.clone());
            state.retry_at = None;
        }
    }

    fn start_kind(
        &self,
        state: &mut KindSet,
        resource: ApiResource,
        delay: Duration,
        restarts: u32,
        cancel: &CancellationToken,
    ) {
        let gvr = resource.gvr.clone();
        let storage = match self.ctx.factory.new_resource_storage(self.scheme.resource_config(&resource)) {
            Ok(storage) => storage,
            Err(err) => {
                warn!(cluster = %self.ctx.cluster, resource = %gvr, error = %err, "Storage cannot represent resource");
                self.ctx.statuses.set(&gvr, SynchroStatus::Error { reason: err.to_string() });
                return;
            }
        };
        let storage_gvr = storage.config().storage_gvr();

        let generation = state.next_generation;
        state.next_generation += 1;
        let token = cancel.child_token();
        let synchro = ResourceSynchro::new(self.ctx.clone(), resource.clone(), storage);
        let exits = state.exits.clone();
        let exit_gvr = gvr.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(synchro.run(run_token, delay)).catch_unwind().await;
            let _ = exits.send(KindExit {
                gvr: exit_gvr,
                generation,
                panic: outcome.err().map(|payload| panic_message(payload.as_ref())),
            });
        });

        debug!(cluster = %self.ctx.cluster, resource = %gvr, generation, "Started resource synchro");
        state.kinds.insert(
            gvr,
            KindWorker {
                resource,
                generation,
                storage_gvr,
                restarts,
                cancel: token,
                handle,
            },
        );
    }

    fn handle_exit(&self, state: &mut KindSet, exit: KindExit, cancel: &CancellationToken) {
        let Some(reason) = exit.panic else {
            return;
        };
        let current = state
            .kinds
            .get(&exit.gvr)
            .filter(|w| w.generation == exit.generation && !w.cancel.is_cancelled());
        let Some(worker) = current else {
            return;
        };
        if cancel.is_cancelled() {
            return;
        }

        let restarts = worker.restarts.saturating_add(1);
        let resource = worker.resource.clone();
        let delay = self.ctx.config.backoff.delay(restarts - 1);
        error!(cluster = %self.ctx.cluster, resource = %exit.gvr, %reason, restarts, "Resource synchro panicked, restarting");
        self.ctx.statuses.set(
            &exit.gvr,
            SynchroStatus::Error {
                reason: format!("panicked: {reason}"),
            },
        );
        self.start_kind(state, resource, delay, restarts, cancel);
    }
}
