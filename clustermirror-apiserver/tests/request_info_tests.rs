use axum::http::Method;
use clustermirror_apiserver::RequestInfo;
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn parse(method: Method, path: &str) -> RequestInfo {
    RequestInfo::parse(&method, path, &HashMap::new())
}

fn parse_with_query(method: Method, path: &str, query: &[(&str, &str)]) -> RequestInfo {
    let query: HashMap<String, String> = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    RequestInfo::parse(&method, path, &query)
}

#[test]
fn namespaced_get_in_named_group() {
    let info = parse(Method::GET, "/clusters/east/apis/apps/v1/namespaces/default/deployments/web");
    assert_eq!(
        info,
        RequestInfo {
            is_resource_request: true,
            path: "/apis/apps/v1/namespaces/default/deployments/web".to_string(),
            verb: "get".to_string(),
            api_group: "apps".to_string(),
            api_version: "v1".to_string(),
            namespace: "default".to_string(),
            resource: "deployments".to_string(),
            subresource: String::new(),
            name: "web".to_string(),
            cluster: "east".to_string(),
        }
    );
}

#[test]
fn core_group_list_across_namespaces() {
    let info = parse(Method::GET, "/api/v1/pods");
    assert!(info.is_resource_request);
    assert_eq!(info.verb, "list");
    assert_eq!(info.api_group, "");
    assert_eq!(info.resource, "pods");
    assert_eq!(info.namespace, "");
    assert_eq!(info.cluster, "");
    assert_eq!(info.gvr().to_string(), "v1/pods");
}

#[test]
fn cluster_query_parameter_names_several_clusters() {
    let info = parse_with_query(Method::GET, "/api/v1/pods", &[("cluster", "east, west,,")]);
    assert_eq!(info.clusters(), vec!["east".to_string(), "west".to_string()]);
}

#[test]
fn path_prefix_wins_over_query_parameter() {
    let info = parse_with_query(Method::GET, "/clusters/east/api/v1/pods", &[("cluster", "west")]);
    assert_eq!(info.clusters(), vec!["east".to_string()]);
}

#[test]
fn watch_is_recognized_by_path_and_query() {
    assert_eq!(parse(Method::GET, "/api/v1/watch/namespaces/default/pods").verb, "watch");
    assert_eq!(
        parse_with_query(Method::GET, "/api/v1/pods", &[("watch", "true")]).verb,
        "watch"
    );
    assert_eq!(
        parse_with_query(Method::GET, "/api/v1/pods", &[("watch", "false")]).verb,
        "list"
    );
}

#[test]
fn write_methods_map_to_write_verbs() {
    let path = "/apis/apps/v1/namespaces/default/deployments";
    assert_eq!(parse(Method::POST, path).verb, "create");
    assert_eq!(parse(Method::DELETE, path).verb, "deletecollection");
    let item = "/apis/apps/v1/namespaces/default/deployments/web";
    assert_eq!(parse(Method::PUT, item).verb, "update");
    assert_eq!(parse(Method::PATCH, item).verb, "patch");
    assert_eq!(parse(Method::DELETE, item).verb, "delete");
}

#[test]
fn subresource_is_split_off() {
    let info = parse(Method::GET, "/api/v1/namespaces/default/pods/web-0/log");
    assert_eq!(info.name, "web-0");
    assert_eq!(info.subresource, "log");
}

#[test]
fn namespace_object_is_a_cluster_scoped_get() {
    let info = parse(Method::GET, "/api/v1/namespaces/default");
    assert!(info.is_resource_request);
    assert_eq!(info.resource, "namespaces");
    assert_eq!(info.name, "default");
    assert_eq!(info.namespace, "");
    assert_eq!(info.verb, "get");
}

#[test]
fn discovery_paths_are_not_resource_requests() {
    for path in ["/api", "/apis", "/api/v1", "/apis/apps/v1", "/version", "/healthz"] {
        let info = parse(Method::GET, path);
        assert!(!info.is_resource_request, "{path}");
        assert_eq!(info.verb, "get", "{path}");
    }
    let info = parse(Method::GET, "/apis/apps/v1");
    assert_eq!(info.api_group, "apps");
    assert_eq!(info.api_version, "v1");
}
