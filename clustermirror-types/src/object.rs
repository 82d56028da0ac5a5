//! Metadata extraction from schema-less object bodies.

use crate::{Error, ResourceVersion, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// The indexed identity fields of a mirrored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub uid: String,
    pub resource_version: ResourceVersion,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    pub api_version: Option<String>,
}

impl ObjectMeta {
    /// Reads `metadata` and the type fields from an object body.
    ///
    /// Only `metadata.name` is mandatory; every other field defaults to empty.
    pub fn from_object(object: &Value) -> Result<Self> {
        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::InvalidObject("missing metadata".to_string()))?;

        let str_field = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let name = str_field("name");
        if name.is_empty() {
            return Err(Error::InvalidObject("missing metadata.name".to_string()));
        }

        let creation_timestamp = metadata
            .get("creationTimestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Self {
            name,
            namespace: str_field("namespace"),
            uid: str_field("uid"),
            resource_version: ResourceVersion::new(str_field("resourceVersion")),
            creation_timestamp,
            kind: object.get("kind").and_then(Value::as_str).map(str::to_string),
            api_version: object
                .get("apiVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// The cursor-map key of this object.
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// Builds the `namespace/name` key, or just `name` for cluster-scoped objects.
pub fn object_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}
