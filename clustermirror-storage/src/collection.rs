//! The static collection registry.

use crate::error::{StorageError, StorageResult};
use clustermirror_types::CollectionResource;

/// Read-only set of collection definitions, fixed at factory construction.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    collections: Vec<CollectionResource>,
}

impl CollectionRegistry {
    /// A registry holding only the built-in `workloads` collection.
    pub fn new() -> Self {
        Self {
            collections: vec![CollectionResource::workloads()],
        }
    }

    /// The built-ins plus `extra`. Invalid or duplicate definitions are an
    /// error so that a bad registration aborts startup.
    pub fn with_collections(extra: impl IntoIterator<Item = CollectionResource>) -> StorageResult<Self> {
        let mut registry = Self::new();
        for collection in extra {
            collection
                .validate()
                .map_err(|e| StorageError::Unsupported(e.to_string()))?;
            if registry.get(&collection.name).is_some() {
                return Err(StorageError::Unsupported(format!(
                    "collection {} registered twice",
                    collection.name
                )));
            }
            registry.collections.push(collection);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&CollectionResource> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn all(&self) -> &[CollectionResource] {
        &self.collections
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
