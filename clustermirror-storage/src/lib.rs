//! Relational storage for mirrored cluster objects.
//!
//! # Architecture
//!
//! - One `resources` table keyed by (group, version, resource, cluster,
//!   namespace, name); object bodies are opaque blobs in their storage version
//! - Watch deletes leave a tombstone (`deleted_at`); cluster and kind
//!   teardown hard-delete
//! - Only identity columns are queryable; selectors that need the body are
//!   rejected
//! - Backends are resolved by name from a fixed constructor table

mod collection;
mod db;
mod error;
mod query;
mod record;
mod sqlite;
mod storage;

pub use collection::CollectionRegistry;
pub use error::{StorageError, StorageResult};
pub use query::{ListOptions, ObjectList};
pub use record::{ClusterResourceCount, ResourceRecord, ResourceVersionMap, UpsertOutcome};
pub use sqlite::SqliteStorageFactory;
pub use storage::{CollectionList, CollectionStorage, ResourceStorage, StorageFactory};

use clustermirror_types::Scheme;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Which backend to open, and where.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    pub backend: String,
    /// Database file; required by file-backed backends.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: Some(path.into()),
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
        }
    }
}

/// Opens one backend kind.
pub type BackendConstructor =
    fn(&StorageConfig, Arc<Scheme>, CollectionRegistry) -> StorageResult<Arc<dyn StorageFactory>>;

fn open_sqlite(
    config: &StorageConfig,
    scheme: Arc<Scheme>,
    collections: CollectionRegistry,
) -> StorageResult<Arc<dyn StorageFactory>> {
    let path = config
        .path
        .as_deref()
        .ok_or_else(|| StorageError::Unsupported("sqlite backend requires a path".to_string()))?;
    Ok(Arc::new(SqliteStorageFactory::open(path, scheme, collections)?))
}

fn open_memory(
    _config: &StorageConfig,
    scheme: Arc<Scheme>,
    collections: CollectionRegistry,
) -> StorageResult<Arc<dyn StorageFactory>> {
    Ok(Arc::new(SqliteStorageFactory::in_memory(scheme, collections)?))
}

/// Known backends, keyed by the name used in configuration.
pub const BACKENDS: &[(&str, BackendConstructor)] = &[("sqlite", open_sqlite), ("memory", open_memory)];

/// Opens the backend named by `config.backend`.
pub fn new_storage_factory(
    config: &StorageConfig,
    scheme: Arc<Scheme>,
    collections: CollectionRegistry,
) -> StorageResult<Arc<dyn StorageFactory>> {
    let (_, constructor) = BACKENDS
        .iter()
        .find(|(name, _)| *name == config.backend)
        .ok_or_else(|| StorageError::Unsupported(format!("unknown storage backend {:?}", config.backend)))?;
    constructor(config, scheme, collections)
}

/// Names accepted by [`new_storage_factory`].
pub fn backend_names() -> impl Iterator<Item = &'static str> {
    BACKENDS.iter().map(|(name, _)| *name)
}
