//! Object codecs.
//!
//! A codec turns an in-memory object into the bytes persisted by the
//! storage engine, and back. Encoding targets the storage version and
//! decoding targets the version served to callers; for untyped bodies the
//! conversion is limited to rewriting `apiVersion`.

use crate::{GroupVersion, Result};
use serde_json::Value;
use std::fmt;

pub trait Codec: Send + Sync + fmt::Debug {
    /// Encodes `object` into the `target` (storage) version.
    fn encode(&self, object: &Value, target: &GroupVersion) -> Result<Vec<u8>>;

    /// Decodes `data` into the `target` (in-memory) version.
    fn decode(&self, data: &[u8], target: &GroupVersion) -> Result<Value>;
}

/// JSON codec for untyped object bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    fn convert(mut object: Value, target: &GroupVersion) -> Value {
        if let Some(map) = object.as_object_mut() {
            map.insert(
                "apiVersion".to_string(),
                Value::String(target.api_version()),
            );
        }
        object
    }
}

impl Codec for JsonCodec {
    fn encode(&self, object: &Value, target: &GroupVersion) -> Result<Vec<u8>> {
        let converted = Self::convert(object.clone(), target);
        Ok(serde_json::to_vec(&converted)?)
    }

    fn decode(&self, data: &[u8], target: &GroupVersion) -> Result<Value> {
        let object: Value = serde_json::from_slice(data)?;
        Ok(Self::convert(object, target))
    }
}
