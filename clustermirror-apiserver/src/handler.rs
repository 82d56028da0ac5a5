//! The Resource Routing Handler.
//!
//! Every inbound request is classified by [`route`], a pure decision over
//! the parsed [`RequestInfo`] and the current discovery state, and then
//! answered from storage, from the discovery documents, or by the
//! pass-through [`Delegate`]. Nothing here writes to storage.

use crate::discovery::{DiscoveryManager, COLLECTION_GROUP, COLLECTION_RESOURCE, COLLECTION_VERSION};
use crate::error::ApiError;
use crate::passthrough::Delegate;
use crate::request::RequestInfo;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Json, Response};
use clustermirror_storage::{ListOptions, ResourceStorage, StorageFactory};
use clustermirror_types::{ApiResource, GroupResource, GroupVersion, Scheme};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Where a request is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Discovery and other non-resource paths.
    Discovery,
    /// Not answerable by the mirror.
    PassThrough,
    /// A verb the mirror does not serve on a mirrored kind.
    MethodNotSupported,
    /// The collection endpoint.
    Collection,
    Get(ApiResource),
    List(ApiResource),
}

/// Decides how `info` is answered.
pub fn route(info: &RequestInfo, discovery: &DiscoveryManager) -> Route {
    if !info.is_resource_request {
        return Route::Discovery;
    }
    if info.api_group == COLLECTION_GROUP
        && info.api_version == COLLECTION_VERSION
        && info.resource == COLLECTION_RESOURCE
    {
        return match info.verb.as_str() {
            "get" | "list" if info.subresource.is_empty() => Route::Collection,
            _ => Route::MethodNotSupported,
        };
    }
    if !info.subresource.is_empty() {
        return Route::PassThrough;
    }

    let gvr = info.gvr();
    let clusters = info.clusters();
    // Every named cluster must mirror the kind.
    if !clusters.iter().all(|cluster| discovery.enabled(cluster, &gvr)) {
        return Route::PassThrough;
    }
    let lookup = clusters.first().map_or("", String::as_str);
    let Some(resource) = discovery.resource(lookup, &gvr) else {
        return Route::PassThrough;
    };
    let scope_matches = if resource.namespaced {
        !info.namespace.is_empty() || info.name.is_empty()
    } else {
        info.namespace.is_empty()
    };
    if !scope_matches {
        return Route::PassThrough;
    }

    match info.verb.as_str() {
        // A single object with no single cluster is ambiguous.
        "get" if clusters.len() != 1 => Route::PassThrough,
        "get" => Route::Get(resource),
        "list" => Route::List(resource),
        _ => Route::MethodNotSupported,
    }
}

/// List timeout: the requested `timeoutSeconds`, never below `minimum`.
pub fn effective_timeout(requested: Option<u64>, minimum: Duration) -> Duration {
    requested.map(Duration::from_secs).unwrap_or_default().max(minimum)
}

pub struct ResourceHandler {
    discovery: Arc<DiscoveryManager>,
    factory: Arc<dyn StorageFactory>,
    scheme: Arc<Scheme>,
    delegate: Arc<dyn Delegate>,
    min_request_timeout: Duration,
    adapters: RwLock<HashMap<ApiResource, Arc<dyn ResourceStorage>>>,
}

impl ResourceHandler {
    pub fn new(
        discovery: Arc<DiscoveryManager>,
        factory: Arc<dyn StorageFactory>,
        scheme: Arc<Scheme>,
        delegate: Arc<dyn Delegate>,
        min_request_timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            factory,
            scheme,
            delegate,
            min_request_timeout,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub fn discovery(&self) -> &Arc<DiscoveryManager> {
        &self.discovery
    }

    /// Answers one request.
    pub async fn serve(&self, request: Request<Body>) -> Response {
        let query = parse_query(request.uri());
        let info = RequestInfo::parse(request.method(), request.uri().path(), &query);
        let decision = route(&info, &self.discovery);
        debug!(path = %info.path, verb = %info.verb, cluster = %info.cluster, route = ?decision, "Routing request");

        let result = match decision {
            Route::Discovery => match self.discovery_document(&info) {
                Some(document) => Ok(Json(document).into_response()),
                None => return self.delegate.forward(request).await,
            },
            Route::PassThrough => return self.delegate.forward(request).await,
            Route::MethodNotSupported => Err(ApiError::MethodNotSupported {
                verb: info.verb.clone(),
                resource: info.group_resource(),
            }),
            Route::Collection => self.serve_collection(&info, &query).await,
            Route::Get(resource) => self.serve_get(&info, &resource).await,
            Route::List(resource) => self.serve_list(&info, &resource, &query).await,
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }

    fn discovery_document(&self, info: &RequestInfo) -> Option<Value> {
        let path = info.path.trim_end_matches('/');
        match path {
            "/api" => Some(self.discovery.api_versions()),
            "/apis" => Some(self.discovery.api_groups()),
            "/version" => Some(json!({
                "major": "1",
                "minor": "0",
                "gitVersion": concat!("v", env!("CARGO_PKG_VERSION")),
                "platform": std::env::consts::OS,
            })),
            _ if !info.api_version.is_empty() && info.resource.is_empty() => self
                .discovery
                .api_resources(&GroupVersion::new(&info.api_group, &info.api_version)),
            _ => None,
        }
    }

    /// The cached adapter for `resource`, created on first use.
    fn adapter(&self, resource: &ApiResource) -> Result<Arc<dyn ResourceStorage>, ApiError> {
        if let Some(adapter) = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
        {
            return Ok(Arc::clone(adapter));
        }
        let adapter = self
            .factory
            .new_resource_storage(self.scheme.resource_config(resource))
            .map_err(|e| ApiError::from_storage(e, &resource.gvr.group_resource(), ""))?;
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.clone(), Arc::clone(&adapter));
        Ok(adapter)
    }

    async fn serve_get(&self, info: &RequestInfo, resource: &ApiResource) -> Result<Response, ApiError> {
        let adapter = self.adapter(resource)?;
        let gr = resource.gvr.group_resource();
        let cluster = info.clusters().into_iter().next().unwrap_or_default();
        let object = adapter
            .get(&cluster, &info.namespace, &info.name)
            .await
            .map_err(|e| ApiError::from_storage(e, &gr, &info.name))?;
        Ok(Json(object).into_response())
    }

    async fn serve_list(
        &self,
        info: &RequestInfo,
        resource: &ApiResource,
        query: &HashMap<String, String>,
    ) -> Result<Response, ApiError> {
        let adapter = self.adapter(resource)?;
        let gr = resource.gvr.group_resource();
        let opts = list_options(info, query, &gr)?;
        let timeout = self.request_timeout(query, &gr)?;

        let list = tokio::time::timeout(timeout, adapter.list(&opts))
            .await
            .map_err(|_| ApiError::Timeout { resource: gr.clone() })?
            .map_err(|e| ApiError::from_storage(e, &gr, ""))?;

        Ok(Json(json!({
            "kind": resource.list_kind(),
            "apiVersion": resource.gvr.group_version().api_version(),
            "metadata": list_metadata(list.continue_token),
            "items": list.items,
        }))
        .into_response())
    }

    async fn serve_collection(&self, info: &RequestInfo, query: &HashMap<String, String>) -> Result<Response, ApiError> {
        let gr = GroupResource::new(COLLECTION_GROUP, COLLECTION_RESOURCE);
        let api_version = format!("{COLLECTION_GROUP}/{COLLECTION_VERSION}");

        if info.name.is_empty() {
            let items: Vec<Value> = self
                .factory
                .collections()
                .into_iter()
                .map(|c| {
                    json!({
                        "kind": "CollectionResource",
                        "apiVersion": api_version,
                        "metadata": {"name": c.name},
                        "resourceTypes": c.resource_types,
                    })
                })
                .collect();
            return Ok(Json(json!({
                "kind": "CollectionResourceList",
                "apiVersion": api_version,
                "metadata": {},
                "items": items,
            }))
            .into_response());
        }

        let collection = self
            .factory
            .collections()
            .into_iter()
            .find(|c| c.name == info.name)
            .ok_or_else(|| ApiError::NotFound {
                resource: gr.clone(),
                name: info.name.clone(),
            })?;
        let storage = self
            .factory
            .new_collection_storage(&collection)
            .map_err(|e| ApiError::from_storage(e, &gr, &info.name))?;
        let opts = list_options(info, query, &gr)?;
        let timeout = self.request_timeout(query, &gr)?;
        let list = tokio::time::timeout(timeout, storage.get(&opts))
            .await
            .map_err(|_| ApiError::Timeout { resource: gr.clone() })?
            .map_err(|e| ApiError::from_storage(e, &gr, &info.name))?;

        let mut metadata = list_metadata(list.continue_token);
        metadata["name"] = json!(list.collection.name);
        Ok(Json(json!({
            "kind": "CollectionResource",
            "apiVersion": api_version,
            "metadata": metadata,
            "resourceTypes": list.collection.resource_types,
            "items": list.items,
        }))
        .into_response())
    }

    fn request_timeout(&self, query: &HashMap<String, String>, gr: &GroupResource) -> Result<Duration, ApiError> {
        let requested = parse_number(query, "timeoutSeconds", gr)?;
        Ok(effective_timeout(requested, self.min_request_timeout))
    }
}

fn list_metadata(continue_token: Option<String>) -> Value {
    match continue_token {
        Some(token) => json!({"continue": token}),
        None => json!({}),
    }
}

fn parse_number(query: &HashMap<String, String>, key: &str, gr: &GroupResource) -> Result<Option<u64>, ApiError> {
    match query.get(key).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ApiError::BadRequest {
            resource: gr.clone(),
            message: format!("invalid {key} {value:?}"),
        }),
    }
}

/// Translates list query parameters. `limit=0` means unlimited.
fn list_options(
    info: &RequestInfo,
    query: &HashMap<String, String>,
    gr: &GroupResource,
) -> Result<ListOptions, ApiError> {
    let non_empty = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();
    let limit = parse_number(query, "limit", gr)?
        .filter(|l| *l > 0)
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX));
    Ok(ListOptions {
        clusters: info.clusters(),
        namespaces: if info.namespace.is_empty() {
            Vec::new()
        } else {
            vec![info.namespace.clone()]
        },
        names: if info.name.is_empty() {
            Vec::new()
        } else {
            vec![info.name.clone()]
        },
        label_selector: non_empty("labelSelector"),
        field_selector: non_empty("fieldSelector"),
        limit,
        continue_token: non_empty("continue"),
    })
}

/// Decodes the query string of `uri`. Later duplicates win.
pub fn parse_query(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(query)| query)
        .unwrap_or_default()
}
