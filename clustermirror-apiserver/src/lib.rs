//! Read API over mirrored cluster objects.
//!
//! Every request goes through one fallback handler: the path is parsed into
//! a [`RequestInfo`], [`route`] decides whether the mirror can answer it, and
//! anything it cannot answer is handed to a pass-through [`Delegate`].

pub mod config;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod passthrough;
pub mod request;

pub use config::{ClusterConfig, ConfigError, ServerConfig, SyncSection, UpstreamConfig};
pub use discovery::DiscoveryManager;
pub use error::ApiError;
pub use handler::{effective_timeout, route, ResourceHandler, Route};
pub use passthrough::{Delegate, NotFoundDelegate, UpstreamProxy};
pub use request::RequestInfo;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use std::sync::Arc;

async fn serve_request(State(handler): State<Arc<ResourceHandler>>, request: Request<Body>) -> Response {
    handler.serve(request).await
}

/// Build the HTTP router around `handler`.
pub fn build_router(handler: Arc<ResourceHandler>) -> Router {
    Router::new().fallback(serve_request).with_state(handler)
}
