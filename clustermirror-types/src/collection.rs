//! Statically registered collection resources.
//!
//! A collection merges several resource kinds into one list response, e.g.
//! `workloads` spanning deployments, daemonsets and statefulsets.

use crate::{Error, GroupVersionResource, Result};
use serde::{Deserialize, Serialize};

/// Name of the built-in workloads collection.
pub const WORKLOADS: &str = "workloads";

/// One member kind of a collection. An empty version matches every version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionResourceType {
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub resource: String,
}

impl CollectionResourceType {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: String::new(),
            resource: resource.into(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn matches(&self, gvr: &GroupVersionResource) -> bool {
        self.group == gvr.group
            && self.resource == gvr.resource
            && (self.version.is_empty() || self.version == gvr.version)
    }

    /// Whether some kind is selected by both entries.
    fn overlaps(&self, other: &Self) -> bool {
        let as_gvr = |rt: &Self| GroupVersionResource::new(rt.group.clone(), rt.version.clone(), rt.resource.clone());
        self.matches(&as_gvr(other)) || other.matches(&as_gvr(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResource {
    pub name: String,
    pub resource_types: Vec<CollectionResourceType>,
}

impl CollectionResource {
    pub fn new(name: impl Into<String>, resource_types: Vec<CollectionResourceType>) -> Self {
        Self {
            name: name.into(),
            resource_types,
        }
    }

    /// The built-in `workloads` collection.
    pub fn workloads() -> Self {
        Self::new(
            WORKLOADS,
            vec![
                CollectionResourceType::new("apps", "deployments"),
                CollectionResourceType::new("apps", "daemonsets"),
                CollectionResourceType::new("apps", "statefulsets"),
            ],
        )
    }

    /// Checks the definition can be served: a name and at least one
    /// distinct member kind.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidCollection("empty name".to_string()));
        }
        if self.resource_types.is_empty() {
            return Err(Error::InvalidCollection(format!(
                "{}: no resource types",
                self.name
            )));
        }
        for (i, rt) in self.resource_types.iter().enumerate() {
            if rt.resource.is_empty() {
                return Err(Error::InvalidCollection(format!(
                    "{}: resource type with empty resource",
                    self.name
                )));
            }
            // Overlapping entries would list the same objects twice.
            if self.resource_types[..i].iter().any(|earlier| earlier.overlaps(rt)) {
                return Err(Error::InvalidCollection(format!(
                    "{}: duplicate resource type {}/{}",
                    self.name, rt.group, rt.resource
                )));
            }
        }
        Ok(())
    }
}
