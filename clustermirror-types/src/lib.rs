//! Core type definitions for clustermirror.
//!
//! This crate defines the identity and value types shared by the storage
//! engine, the per-cluster synchronizers and the read API:
//! - Resource kind identity (`GroupVersionResource`, `ApiResource`)
//! - Opaque, cluster-assigned resource versions
//! - Metadata extraction from schema-less object bodies
//! - The immutable codec `Scheme` handed to every component that encodes
//!   or decodes objects
//! - Statically registered collection resources
//!
//! Object bodies are never typed here; they travel as `serde_json::Value`.

mod codec;
mod collection;
mod gvr;
mod object;
mod resource_version;
mod scheme;

pub use codec::{Codec, JsonCodec};
pub use collection::{CollectionResource, CollectionResourceType, WORKLOADS};
pub use gvr::{ApiResource, GroupResource, GroupVersion, GroupVersionResource};
pub use object::{object_key, ObjectMeta};
pub use resource_version::ResourceVersion;
pub use scheme::{ResourceStorageConfig, Scheme, SchemeBuilder};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid group/version/resource: {0}")]
    InvalidGroupVersionResource(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("invalid collection resource: {0}")]
    InvalidCollection(String),
}
