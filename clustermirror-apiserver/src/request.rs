//! Request classification.
//!
//! Resource paths follow the Kubernetes layout:
//!
//! ```text
//! /api/{version}[/watch][/namespaces/{ns}]/{resource}[/{name}[/{subresource}]]
//! /apis/{group}/{version}[/watch][/namespaces/{ns}]/{resource}[/{name}[/{subresource}]]
//! ```
//!
//! The target cluster is taken from a `/clusters/{name}` path prefix or the
//! `cluster` query parameter. Several clusters may be named with commas.

use axum::http::Method;
use clustermirror_types::{GroupResource, GroupVersionResource};
use std::collections::HashMap;

/// Everything routing needs to know about one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub is_resource_request: bool,
    /// The request path without any `/clusters/{name}` prefix.
    pub path: String,
    pub verb: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    /// Comma-separated cluster names; empty when unscoped.
    pub cluster: String,
}

impl RequestInfo {
    pub fn parse(method: &Method, path: &str, query: &HashMap<String, String>) -> Self {
        let (prefix_cluster, path) = strip_cluster_prefix(path);
        let cluster = prefix_cluster
            .or_else(|| query.get("cluster").cloned())
            .unwrap_or_default();

        let mut info = RequestInfo {
            path: path.clone(),
            cluster,
            verb: method.as_str().to_ascii_lowercase(),
            ..Default::default()
        };

        let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|p| !p.is_empty()).collect();
        let rest = match parts.as_slice() {
            ["api", version, rest @ ..] => {
                info.api_version = version.to_string();
                rest
            }
            ["apis", group, version, rest @ ..] => {
                info.api_group = group.to_string();
                info.api_version = version.to_string();
                rest
            }
            _ => return info,
        };
        if rest.is_empty() {
            return info;
        }

        let mut rest = rest;
        let mut watch_path = false;
        if rest[0] == "watch" {
            watch_path = true;
            rest = &rest[1..];
        }
        if rest.first() == Some(&"namespaces") && rest.len() >= 2 {
            info.namespace = rest[1].to_string();
            // `/namespaces/{name}` addresses the namespace object itself.
            if rest.len() > 2 {
                rest = &rest[2..];
            } else {
                info.namespace.clear();
                info.resource = "namespaces".to_string();
                info.name = rest[1].to_string();
                rest = &[];
            }
        }
        if let Some(resource) = rest.first() {
            info.resource = resource.to_string();
        }
        if let Some(name) = rest.get(1) {
            info.name = name.to_string();
        }
        if rest.len() > 2 {
            info.subresource = rest[2..].join("/");
        }
        if info.resource.is_empty() {
            return info;
        }

        info.is_resource_request = true;
        info.verb = resource_verb(method, &info.name, watch_path || is_true(query.get("watch")));
        info
    }

    pub fn gvr(&self) -> GroupVersionResource {
        GroupVersionResource::new(&self.api_group, &self.api_version, &self.resource)
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.api_group, &self.resource)
    }

    /// The named clusters, in request order.
    pub fn clusters(&self) -> Vec<String> {
        self.cluster
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn is_true(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("true" | "1"))
}

fn resource_verb(method: &Method, name: &str, watch: bool) -> String {
    let verb = match *method {
        Method::GET | Method::HEAD if watch => "watch",
        Method::GET | Method::HEAD if name.is_empty() => "list",
        Method::GET | Method::HEAD => "get",
        Method::POST => "create",
        Method::PUT => "update",
        Method::PATCH => "patch",
        Method::DELETE if name.is_empty() => "deletecollection",
        Method::DELETE => "delete",
        _ => return method.as_str().to_ascii_lowercase(),
    };
    verb.to_string()
}

/// Splits `/clusters/{name}/rest` into (`name`, `/rest`).
fn strip_cluster_prefix(path: &str) -> (Option<String>, String) {
    if let Some(rest) = path.strip_prefix("/clusters/") {
        let (name, remainder) = rest.split_once('/').unwrap_or((rest, ""));
        if !name.is_empty() {
            return (Some(name.to_string()), format!("/{remainder}"));
        }
    }
    (None, path.to_string())
}
