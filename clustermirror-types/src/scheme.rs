//! The codec registry.
//!
//! A `Scheme` is built once at startup and shared by reference with every
//! component that needs encode/decode capability. It is immutable after
//! `SchemeBuilder::build`.

use crate::{ApiResource, Codec, GroupResource, GroupVersion, GroupVersionResource, JsonCodec};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a per-kind storage adapter needs to persist and serve objects.
#[derive(Debug, Clone)]
pub struct ResourceStorageConfig {
    pub resource: ApiResource,
    pub codec: Arc<dyn Codec>,
    /// Version objects are converted to before they are persisted.
    pub storage_version: GroupVersion,
    /// Version objects are converted to when served.
    pub memory_version: GroupVersion,
}

impl ResourceStorageConfig {
    /// The kind as it is keyed in storage: the resource under its storage version.
    pub fn storage_gvr(&self) -> GroupVersionResource {
        GroupVersionResource::new(
            &self.storage_version.group,
            &self.storage_version.version,
            &self.resource.gvr.resource,
        )
    }
}

#[derive(Debug)]
pub struct Scheme {
    codec: Arc<dyn Codec>,
    storage_versions: HashMap<GroupResource, String>,
}

impl Scheme {
    pub fn builder() -> SchemeBuilder {
        SchemeBuilder::default()
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// The version a group-resource is persisted as, if overridden.
    pub fn storage_version(&self, gr: &GroupResource) -> Option<&str> {
        self.storage_versions.get(gr).map(String::as_str)
    }

    /// Builds the storage configuration for a discovered resource.
    ///
    /// Objects are served in the version they were discovered with and
    /// persisted in the overridden storage version when one is registered.
    pub fn resource_config(&self, resource: &ApiResource) -> ResourceStorageConfig {
        let memory_version = resource.gvr.group_version();
        let storage_version = match self.storage_version(&resource.gvr.group_resource()) {
            Some(version) => GroupVersion::new(&resource.gvr.group, version),
            None => memory_version.clone(),
        };
        ResourceStorageConfig {
            resource: resource.clone(),
            codec: Arc::clone(&self.codec),
            storage_version,
            memory_version,
        }
    }
}

impl Default for Scheme {
    fn default() -> Self {
        SchemeBuilder::default().build()
    }
}

#[derive(Debug, Default)]
pub struct SchemeBuilder {
    codec: Option<Arc<dyn Codec>>,
    storage_versions: HashMap<GroupResource, String>,
}

impl SchemeBuilder {
    /// Replaces the default JSON codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Persists `gr` in `version` regardless of the version it was discovered with.
    #[must_use]
    pub fn storage_version(mut self, gr: GroupResource, version: impl Into<String>) -> Self {
        self.storage_versions.insert(gr, version.into());
        self
    }

    pub fn build(self) -> Scheme {
        Scheme {
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            storage_versions: self.storage_versions,
        }
    }
}
