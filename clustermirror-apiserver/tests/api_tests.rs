use axum::http::{HeaderMap, Method, Uri};
use axum::response::Json;
use axum::Router;
use clustermirror_apiserver::{build_router, DiscoveryManager, ResourceHandler, UpstreamProxy};
use clustermirror_storage::{CollectionRegistry, SqliteStorageFactory, StorageFactory};
use clustermirror_sync::SyncObserver;
use clustermirror_types::{ApiResource, GroupVersionResource, Scheme};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn deployments() -> ApiResource {
    ApiResource::new(GroupVersionResource::new("apps", "v1", "deployments"), "Deployment", true)
}

fn make_deployment(namespace: &str, name: &str, replicas: u64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace, "uid": format!("{namespace}-{name}")},
        "spec": {"replicas": replicas},
    })
}

/// Echoes the forwarded path and credentials back to the caller.
async fn echo(uri: Uri, headers: HeaderMap) -> Json<Value> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"upstream": true, "path": uri.to_string(), "authorization": authorization}))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

struct TestServer {
    base: String,
    factory: Arc<SqliteStorageFactory>,
    discovery: Arc<DiscoveryManager>,
}

/// Mirror with deployments in `east` (api, web) and `west` (web), served in
/// front of an echoing upstream.
async fn spawn_test_server() -> TestServer {
    let scheme = Arc::new(Scheme::default());
    let factory = Arc::new(SqliteStorageFactory::in_memory(Arc::clone(&scheme), CollectionRegistry::new()).unwrap());
    let storage = factory
        .new_resource_storage(scheme.resource_config(&deployments()))
        .unwrap();
    storage.upsert("east", &make_deployment("default", "api", 1)).await.unwrap();
    storage.upsert("east", &make_deployment("default", "web", 3)).await.unwrap();
    storage.upsert("west", &make_deployment("default", "web", 2)).await.unwrap();

    let discovery = Arc::new(DiscoveryManager::new());
    discovery.resource_enabled("east", &deployments());
    discovery.resource_enabled("west", &deployments());

    let upstream = serve(Router::new().fallback(echo)).await;
    let delegate = UpstreamProxy::new(upstream, Some("secret".to_string())).unwrap();
    let handler = ResourceHandler::new(
        Arc::clone(&discovery),
        factory.clone(),
        scheme,
        Arc::new(delegate),
        Duration::from_secs(60),
    );
    let base = serve(build_router(Arc::new(handler))).await;
    TestServer { base, factory, discovery }
}

async fn get_json(url: String) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

fn item_names(list: &Value) -> Vec<String> {
    list["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["metadata"]["name"].as_str().unwrap().to_string())
        .collect()
}

// ── Storage-backed reads ────────────────────────────────────────

#[tokio::test]
async fn unscoped_list_merges_every_cluster() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!("{}/apis/apps/v1/deployments", server.base)).await;

    assert_eq!(status, 200);
    assert_eq!(body["kind"], "DeploymentList");
    assert_eq!(body["apiVersion"], "apps/v1");
    assert_eq!(item_names(&body), vec!["api", "web", "web"]);
    assert!(body["metadata"].get("continue").is_none());
}

#[tokio::test]
async fn list_is_scoped_by_cluster_and_namespace() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/clusters/east/apis/apps/v1/namespaces/default/deployments",
        server.base
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(item_names(&body), vec!["api", "web"]);

    let (_, body) = get_json(format!("{}/apis/apps/v1/deployments?cluster=west", server.base)).await;
    assert_eq!(item_names(&body), vec!["web"]);
    assert_eq!(body["items"][0]["spec"]["replicas"], 2);

    let (_, body) = get_json(format!(
        "{}/clusters/east/apis/apps/v1/namespaces/other/deployments",
        server.base
    ))
    .await;
    assert_eq!(item_names(&body), Vec::<String>::new());
}

#[tokio::test]
async fn list_pages_with_continue_token() {
    let server = spawn_test_server().await;
    let (_, first) = get_json(format!("{}/apis/apps/v1/deployments?limit=2", server.base)).await;
    assert_eq!(first["items"].as_array().unwrap().len(), 2);
    let token = first["metadata"]["continue"].as_str().unwrap().to_string();

    let (status, second) = get_json(format!(
        "{}/apis/apps/v1/deployments?limit=2&continue={}",
        server.base, token
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(second["items"].as_array().unwrap().len(), 1);
    assert!(second["metadata"].get("continue").is_none());
}

#[tokio::test]
async fn zero_limit_means_unlimited() {
    let server = spawn_test_server().await;
    let (_, body) = get_json(format!("{}/apis/apps/v1/deployments?limit=0", server.base)).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn get_returns_the_stored_object() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/clusters/east/apis/apps/v1/namespaces/default/deployments/web",
        server.base
    ))
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["metadata"]["name"], "web");
    assert_eq!(body["spec"]["replicas"], 3);
    assert_eq!(body["kind"], "Deployment");
}

#[tokio::test]
async fn get_of_missing_object_is_a_not_found_status() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/clusters/east/apis/apps/v1/namespaces/default/deployments/missing",
        server.base
    ))
    .await;

    assert_eq!(status, 404);
    assert_eq!(body["kind"], "Status");
    assert_eq!(body["reason"], "NotFound");
    assert_eq!(body["code"], 404);
    assert_eq!(body["details"]["group"], "apps");
    assert_eq!(body["details"]["kind"], "deployments");
    assert_eq!(body["details"]["name"], "missing");
}

#[tokio::test]
async fn deleted_object_is_not_served() {
    let server = spawn_test_server().await;
    let storage = server
        .factory
        .new_resource_storage(Scheme::default().resource_config(&deployments()))
        .unwrap();
    storage
        .mark_deleted("east", &make_deployment("default", "web", 3))
        .await
        .unwrap();

    let (status, _) = get_json(format!(
        "{}/clusters/east/apis/apps/v1/namespaces/default/deployments/web",
        server.base
    ))
    .await;
    assert_eq!(status, 404);
    let (_, body) = get_json(format!("{}/clusters/east/apis/apps/v1/deployments", server.base)).await;
    assert_eq!(item_names(&body), vec!["api"]);
}

// ── Errors ──────────────────────────────────────────────────────

#[tokio::test]
async fn writes_are_method_not_allowed() {
    let server = spawn_test_server().await;
    let resp = reqwest::Client::new()
        .request(
            Method::DELETE,
            format!("{}/clusters/east/apis/apps/v1/namespaces/default/deployments/web", server.base),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 405);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reason"], "MethodNotAllowed");
}

#[tokio::test]
async fn unsupported_selectors_are_bad_requests() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/apis/apps/v1/deployments?labelSelector=app%3Dweb",
        server.base
    ))
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["reason"], "BadRequest");

    let (status, _) = get_json(format!("{}/apis/apps/v1/deployments?limit=many", server.base)).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn huge_paging_values_do_not_break_lists() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/apis/apps/v1/deployments?limit={}",
        server.base,
        u64::MAX
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(item_names(&body), vec!["api", "web", "web"]);

    let (status, body) = get_json(format!(
        "{}/apis/apps/v1/deployments?limit=2&continue={}",
        server.base,
        u64::MAX
    ))
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["reason"], "BadRequest");

    let (status, _) = get_json(format!(
        "{}/apis/clustermirror.io/v1alpha1/collectionresources/workloads?limit=1&continue={}",
        server.base,
        u64::MAX
    ))
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn field_selector_on_name_is_served() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!(
        "{}/apis/apps/v1/deployments?fieldSelector=metadata.name%3Dapi",
        server.base
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(item_names(&body), vec!["api"]);
}

// ── Pass-through ────────────────────────────────────────────────

#[tokio::test]
async fn unmirrored_kinds_are_forwarded_upstream() {
    let server = spawn_test_server().await;
    let (status, body) = get_json(format!("{}/api/v1/namespaces/default/pods?limit=5", server.base)).await;

    assert_eq!(status, 200);
    assert_eq!(body["upstream"], true);
    assert_eq!(body["path"], "/api/v1/namespaces/default/pods?limit=5");
    assert_eq!(body["authorization"], "Bearer secret");
}

#[tokio::test]
async fn disabled_kind_is_forwarded_upstream() {
    let server = spawn_test_server().await;
    server.discovery.resource_disabled("west", &deployments().gvr);

    let (_, body) = get_json(format!("{}/clusters/west/apis/apps/v1/deployments", server.base)).await;
    assert_eq!(body["upstream"], true);
    let (_, body) = get_json(format!("{}/clusters/east/apis/apps/v1/deployments", server.base)).await;
    assert_eq!(body["kind"], "DeploymentList");
}

#[tokio::test]
async fn unscoped_get_is_forwarded_upstream() {
    let server = spawn_test_server().await;
    let (_, body) = get_json(format!(
        "{}/apis/apps/v1/namespaces/default/deployments/web",
        server.base
    ))
    .await;
    assert_eq!(body["upstream"], true);
}

// ── Discovery and collections ───────────────────────────────────

#[tokio::test]
async fn discovery_documents_describe_mirrored_kinds() {
    let server = spawn_test_server().await;
    let (status, groups) = get_json(format!("{}/apis", server.base)).await;
    assert_eq!(status, 200);
    assert_eq!(groups["kind"], "APIGroupList");
    let names: Vec<&str> = groups["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["apps", "clustermirror.io"]);

    let (_, resources) = get_json(format!("{}/apis/apps/v1", server.base)).await;
    assert_eq!(resources["kind"], "APIResourceList");
    assert_eq!(resources["resources"][0]["name"], "deployments");

    // Nothing in batch/v1 is mirrored.
    let (_, body) = get_json(format!("{}/apis/batch/v1", server.base)).await;
    assert_eq!(body["upstream"], true);
}

#[tokio::test]
async fn collections_are_listed_and_merged() {
    let server = spawn_test_server().await;
    let base = format!("{}/apis/clustermirror.io/v1alpha1/collectionresources", server.base);

    let (status, list) = get_json(base.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(list["kind"], "CollectionResourceList");
    assert_eq!(list["items"][0]["metadata"]["name"], "workloads");

    let (status, workloads) = get_json(format!("{base}/workloads?cluster=east")).await;
    assert_eq!(status, 200);
    assert_eq!(workloads["kind"], "CollectionResource");
    assert_eq!(workloads["metadata"]["name"], "workloads");
    assert_eq!(item_names(&workloads), vec!["api", "web"]);

    let (status, body) = get_json(format!("{base}/missing")).await;
    assert_eq!(status, 404);
    assert_eq!(body["details"]["name"], "missing");
}
