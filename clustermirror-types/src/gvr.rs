//! Resource kind identity.
//!
//! A mirrored type is identified by its (group, version, resource) tuple.
//! The core group is the empty string, rendered as `v1/pods`.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An API group and version, e.g. `apps/v1` or `v1` for the core group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// The value carried in an object's `apiVersion` field.
    pub fn api_version(&self) -> String {
        self.to_string()
    }

    /// The URL prefix serving this group version.
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }

    /// Parses an `apiVersion` value (`apps/v1`, `v1`).
    pub fn parse_api_version(s: &str) -> Self {
        match s.split_once('/') {
            Some((group, version)) => Self::new(group, version),
            None => Self::new("", s),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// A group and resource without a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Identity of a mirrored type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    #[must_use]
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.group, &self.version)
    }

    #[must_use]
    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.group, &self.resource)
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

impl FromStr for GroupVersionResource {
    type Err = Error;

    /// Parses `group/version/resource`, or `version/resource` for the core group.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let gvr = match parts.as_slice() {
            [version, resource] => Self::new("", *version, *resource),
            [group, version, resource] => Self::new(*group, *version, *resource),
            _ => return Err(Error::InvalidGroupVersionResource(s.to_string())),
        };
        if gvr.version.is_empty() || gvr.resource.is_empty() {
            return Err(Error::InvalidGroupVersionResource(s.to_string()));
        }
        Ok(gvr)
    }
}

/// A mirrored kind as discovered from a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiResource {
    pub gvr: GroupVersionResource,
    /// The object kind, e.g. `Deployment`.
    pub kind: String,
    /// Whether objects of this kind live inside a namespace.
    pub namespaced: bool,
}

impl ApiResource {
    pub fn new(gvr: GroupVersionResource, kind: impl Into<String>, namespaced: bool) -> Self {
        Self {
            gvr,
            kind: kind.into(),
            namespaced,
        }
    }

    /// The kind of the list wrapper returned for this resource.
    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }
}
