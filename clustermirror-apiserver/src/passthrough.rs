//! Pass-through for requests the mirror does not answer.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use clustermirror_types::GroupResource;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest request body forwarded upstream.
const MAX_FORWARDED_BODY: usize = 16 * 1024 * 1024;

/// Answers requests on behalf of an external, already-correct system.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn forward(&self, request: Request<Body>) -> Response;
}

/// Answers every request with a `NotFound` status.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundDelegate;

#[async_trait]
impl Delegate for NotFoundDelegate {
    async fn forward(&self, request: Request<Body>) -> Response {
        ApiError::NotFound {
            resource: GroupResource::new("", ""),
            name: request.uri().path().to_string(),
        }
        .into_response()
    }
}

/// Forwards requests to an upstream API server.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    base: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl UpstreamProxy {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Upstream(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("{}{}", self.base, path_and_query);
        let body = to_bytes(body, MAX_FORWARDED_BODY)
            .await
            .map_err(|e| ApiError::Upstream(format!("failed to read request body: {e}")))?;

        let mut headers = forwarded_headers(&parts.headers);
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::Upstream(format!("invalid upstream token: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        debug!(method = %parts.method, %url, "Forwarding request upstream");
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = HeaderMap::new();
        if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
            response_headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        Ok((status, response_headers, bytes).into_response())
    }
}

/// Request headers worth forwarding; hop-by-hop and host headers are dropped.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in [header::ACCEPT, header::CONTENT_TYPE, header::AUTHORIZATION, header::USER_AGENT] {
        if let Some(value) = headers.get(&name) {
            forwarded.insert(name, value.clone());
        }
    }
    forwarded
}

#[async_trait]
impl Delegate for UpstreamProxy {
    async fn forward(&self, request: Request<Body>) -> Response {
        match self.send(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(upstream = %self.base, error = %err, "Pass-through failed");
                err.into_response()
            }
        }
    }
}
