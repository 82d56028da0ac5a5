//! The set of member clusters to mirror.

use crate::client::ClusterClient;
use clustermirror_types::GroupVersionResource;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

/// One registered cluster.
#[derive(Clone)]
pub struct ClusterSpec {
    pub name: String,
    pub client: Arc<dyn ClusterClient>,
    /// Kinds to mirror from this cluster.
    pub resources: Vec<GroupVersionResource>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>, client: Arc<dyn ClusterClient>, resources: Vec<GroupVersionResource>) -> Self {
        Self {
            name: name.into(),
            client,
            resources,
        }
    }
}

impl fmt::Debug for ClusterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSpec")
            .field("name", &self.name)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Upserted(String),
    Removed(String),
}

impl RegistryEvent {
    pub fn cluster(&self) -> &str {
        match self {
            Self::Upserted(name) | Self::Removed(name) => name,
        }
    }
}

/// Registered clusters plus a change feed.
///
/// Subscribers that fall behind receive `Lagged` and are expected to
/// resynchronize from [`ClusterRegistry::names`].
pub struct ClusterRegistry {
    clusters: RwLock<BTreeMap<String, ClusterSpec>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clusters: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Registers or replaces a cluster.
    pub fn upsert(&self, spec: ClusterSpec) {
        let name = spec.name.clone();
        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), spec);
        debug!(cluster = %name, "Cluster registered");
        let _ = self.events.send(RegistryEvent::Upserted(name));
    }

    /// Unregisters a cluster. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            debug!(cluster = %name, "Cluster unregistered");
            let _ = self.events.send(RegistryEvent::Removed(name.to_string()));
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<ClusterSpec> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
