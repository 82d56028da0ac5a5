//! Server configuration.
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! min_request_timeout_secs = 60
//!
//! [storage]
//! backend = "sqlite"
//! path = "/var/lib/clustermirror/mirror.db"
//!
//! [upstream]
//! url = "https://kube-apiserver:6443"
//!
//! [sync]
//! concurrency = 4
//! tombstone_retention_secs = 86400
//!
//! [[clusters]]
//! name = "east"
//! server = "https://east.example.com:6443"
//! resources = ["apps/v1/deployments", "v1/pods"]
//! ```

use clustermirror_storage::{backend_names, StorageConfig};
use clustermirror_sync::{BackoffConfig, SynchroConfig};
use clustermirror_types::{CollectionResource, GroupVersionResource};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required section [{0}]")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_min_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Floor for the `timeoutSeconds` of list requests.
    #[serde(default = "default_min_request_timeout_secs")]
    pub min_request_timeout_secs: u64,
    pub storage: Option<StorageConfig>,
    pub upstream: Option<UpstreamConfig>,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub collections: Vec<CollectionResource>,
}

/// The API server answering pass-through requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub name: String,
    pub server: String,
    #[serde(default)]
    pub token: Option<String>,
    /// `group/version/resource`, or `version/resource` for the core group.
    pub resources: Vec<String>,
}

impl ClusterConfig {
    pub fn gvrs(&self) -> Result<Vec<GroupVersionResource>, ConfigError> {
        self.resources
            .iter()
            .map(|r| {
                r.parse::<GroupVersionResource>()
                    .map_err(|e| ConfigError::Invalid(format!("cluster {}: {e}", self.name)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub concurrency: usize,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub reset_after_secs: u64,
    pub write_retries: u32,
    pub list_page_size: usize,
    pub shutdown_timeout_secs: u64,
    pub tombstone_retention_secs: u64,
    /// Zero disables the tombstone purge.
    pub purge_interval_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let synchro = SynchroConfig::default();
        Self {
            concurrency: 4,
            initial_ms: synchro.backoff.initial.as_millis() as u64,
            max_ms: synchro.backoff.max.as_millis() as u64,
            reset_after_secs: synchro.backoff.reset_after.as_secs(),
            write_retries: synchro.write_retries,
            list_page_size: synchro.list_page_size,
            shutdown_timeout_secs: synchro.shutdown_timeout.as_secs(),
            tombstone_retention_secs: synchro.tombstone_retention.as_secs(),
            purge_interval_secs: synchro.purge_interval.as_secs(),
        }
    }
}

impl SyncSection {
    pub fn synchro_config(&self) -> SynchroConfig {
        SynchroConfig {
            backoff: BackoffConfig {
                initial: Duration::from_millis(self.initial_ms),
                max: Duration::from_millis(self.max_ms),
                reset_after: Duration::from_secs(self.reset_after_secs),
            },
            write_retries: self.write_retries,
            list_page_size: self.list_page_size,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            tombstone_retention: Duration::from_secs(self.tombstone_retention_secs),
            purge_interval: Duration::from_secs(self.purge_interval_secs),
            ..SynchroConfig::default()
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = self.storage.as_ref().ok_or(ConfigError::Missing("storage"))?;
        let upstream = self.upstream.as_ref().ok_or(ConfigError::Missing("upstream"))?;

        if !backend_names().any(|name| name == storage.backend) {
            let known: Vec<_> = backend_names().collect();
            return Err(ConfigError::Invalid(format!(
                "unknown storage backend {:?}, expected one of {known:?}",
                storage.backend
            )));
        }
        if upstream.url.is_empty() {
            return Err(ConfigError::Invalid("upstream url is empty".to_string()));
        }
        if self.sync.initial_ms == 0 || self.sync.max_ms < self.sync.initial_ms {
            return Err(ConfigError::Invalid(
                "sync backoff needs 0 < initial_ms <= max_ms".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() || cluster.server.is_empty() {
                return Err(ConfigError::Invalid("cluster needs a name and a server".to_string()));
            }
            if !names.insert(cluster.name.as_str()) {
                return Err(ConfigError::Invalid(format!("cluster {} listed twice", cluster.name)));
            }
            cluster.gvrs()?;
        }

        let mut collections = HashSet::new();
        for collection in &self.collections {
            collection
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !collections.insert(collection.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "collection {} listed twice",
                    collection.name
                )));
            }
        }
        Ok(())
    }

    pub fn min_request_timeout(&self) -> Duration {
        Duration::from_secs(self.min_request_timeout_secs)
    }
}
