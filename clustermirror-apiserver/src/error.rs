//! API errors and their `Status` bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use clustermirror_storage::StorageError;
use clustermirror_types::GroupResource;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{resource} {name:?} not found")]
    NotFound { resource: GroupResource, name: String },

    #[error("{verb} is not supported on {resource}")]
    MethodNotSupported { verb: String, resource: GroupResource },

    #[error("{message}")]
    BadRequest { resource: GroupResource, message: String },

    #[error("{message}")]
    Internal { resource: GroupResource, message: String },

    #[error("request for {resource} timed out")]
    Timeout { resource: GroupResource },

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ApiError {
    /// Tags a storage failure with the resource it was serving.
    pub fn from_storage(err: StorageError, resource: &GroupResource, name: &str) -> Self {
        let resource = resource.clone();
        match err {
            StorageError::NotFound { .. } => Self::NotFound {
                resource,
                name: name.to_string(),
            },
            StorageError::Unsupported(message) => Self::BadRequest { resource, message },
            other => Self::Internal {
                resource,
                message: other.to_string(),
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotSupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::MethodNotSupported { .. } => "MethodNotAllowed",
            Self::BadRequest { .. } => "BadRequest",
            Self::Internal { .. } => "InternalError",
            Self::Timeout { .. } => "Timeout",
            Self::Upstream(_) => "ServiceUnavailable",
        }
    }

    fn resource(&self) -> Option<&GroupResource> {
        match self {
            Self::NotFound { resource, .. }
            | Self::MethodNotSupported { resource, .. }
            | Self::BadRequest { resource, .. }
            | Self::Internal { resource, .. }
            | Self::Timeout { resource } => Some(resource),
            Self::Upstream(_) => None,
        }
    }

    /// The Kubernetes-style `Status` document describing this error.
    pub fn to_status(&self) -> serde_json::Value {
        let mut details = serde_json::Map::new();
        if let Some(resource) = self.resource() {
            details.insert("group".into(), json!(resource.group));
            details.insert("kind".into(), json!(resource.resource));
        }
        if let Self::NotFound { name, .. } = self {
            details.insert("name".into(), json!(name));
        }
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "details": details,
            "code": self.status_code().as_u16(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_status())).into_response()
    }
}
