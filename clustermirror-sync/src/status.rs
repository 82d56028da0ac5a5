use clustermirror_types::GroupVersionResource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Phase of one (cluster, kind) synchronization loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SynchroStatus {
    Initializing,
    Listing,
    Watching,
    Error { reason: String },
    Stopped,
}

impl SynchroStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Latest status of every kind of one cluster.
#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: RwLock<BTreeMap<GroupVersionResource, SynchroStatus>>,
}

impl StatusBoard {
    pub fn set(&self, gvr: &GroupVersionResource, status: SynchroStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gvr.clone(), status);
    }

    pub fn remove(&self, gvr: &GroupVersionResource) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(gvr);
    }

    pub fn snapshot(&self) -> BTreeMap<GroupVersionResource, SynchroStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
