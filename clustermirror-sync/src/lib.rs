//! Synchronization of member clusters into local storage.
//!
//! # Architecture
//!
//! - [`SynchroManager`] keeps one [`ClusterSynchro`] per entry in the
//!   [`ClusterRegistry`] and runs only while told to (see [`LeaderGate`])
//! - A cluster synchro runs one list-then-watch loop per mirrored kind and
//!   reports per-kind [`SynchroStatus`]
//! - Remote access goes through [`ClusterClient`]; [`HttpClusterClient`]
//!   speaks the Kubernetes REST protocol, [`MockClusterClient`] is an
//!   in-memory cluster for tests
//! - Kinds are announced to readers through [`SyncObserver`]

mod backoff;
pub mod client;
mod cluster_synchro;
mod config;
mod error;
mod leader;
mod manager;
mod observer;
mod queue;
mod registry;
mod resource_synchro;
mod status;

pub use backoff::{Backoff, BackoffConfig};
pub use client::http::HttpClusterClient;
pub use client::mock::MockClusterClient;
pub use client::{ClusterClient, ListPage, WatchEvent, WatchStream};
pub use cluster_synchro::{ClusterSynchro, ClusterSynchroHandle};
pub use config::SynchroConfig;
pub use error::{SyncError, SyncResult};
pub use leader::LeaderGate;
pub use manager::SynchroManager;
pub use observer::{NoopObserver, SyncObserver};
pub use registry::{ClusterRegistry, ClusterSpec, RegistryEvent};
pub use status::{StatusBoard, SynchroStatus};

use std::any::Any;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
