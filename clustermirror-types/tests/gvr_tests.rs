use clustermirror_types::{ApiResource, GroupResource, GroupVersion, GroupVersionResource};
use std::str::FromStr;

// ── GroupVersionResource ─────────────────────────────────────────

#[test]
fn gvr_display_named_group() {
    let gvr = GroupVersionResource::new("apps", "v1", "deployments");
    assert_eq!(gvr.to_string(), "apps/v1/deployments");
}

#[test]
fn gvr_display_core_group() {
    let gvr = GroupVersionResource::new("", "v1", "pods");
    assert_eq!(gvr.to_string(), "v1/pods");
}

#[test]
fn gvr_parse_roundtrip() {
    for s in ["apps/v1/deployments", "v1/pods", "batch/v1/jobs"] {
        let gvr = GroupVersionResource::from_str(s).unwrap();
        assert_eq!(gvr.to_string(), s);
    }
}

#[test]
fn gvr_parse_core_group_is_empty() {
    let gvr: GroupVersionResource = "v1/configmaps".parse().unwrap();
    assert_eq!(gvr.group, "");
    assert_eq!(gvr.version, "v1");
    assert_eq!(gvr.resource, "configmaps");
}

#[test]
fn gvr_parse_invalid() {
    assert!(GroupVersionResource::from_str("deployments").is_err());
    assert!(GroupVersionResource::from_str("a/b/c/d").is_err());
    assert!(GroupVersionResource::from_str("apps//deployments").is_err());
    assert!(GroupVersionResource::from_str("apps/v1/").is_err());
}

#[test]
fn gvr_projections() {
    let gvr = GroupVersionResource::new("apps", "v1", "daemonsets");
    assert_eq!(gvr.group_version(), GroupVersion::new("apps", "v1"));
    assert_eq!(gvr.group_resource(), GroupResource::new("apps", "daemonsets"));
}

// ── GroupVersion ─────────────────────────────────────────────────

#[test]
fn group_version_api_path() {
    assert_eq!(GroupVersion::new("", "v1").api_path(), "/api/v1");
    assert_eq!(GroupVersion::new("apps", "v1").api_path(), "/apis/apps/v1");
}

#[test]
fn group_version_parse_api_version() {
    assert_eq!(GroupVersion::parse_api_version("apps/v1"), GroupVersion::new("apps", "v1"));
    assert_eq!(GroupVersion::parse_api_version("v1"), GroupVersion::new("", "v1"));
}

#[test]
fn group_resource_display() {
    assert_eq!(GroupResource::new("apps", "deployments").to_string(), "deployments.apps");
    assert_eq!(GroupResource::new("", "pods").to_string(), "pods");
}

// ── ApiResource ──────────────────────────────────────────────────

#[test]
fn api_resource_list_kind() {
    let res = ApiResource::new(GroupVersionResource::new("apps", "v1", "deployments"), "Deployment", true);
    assert_eq!(res.list_kind(), "DeploymentList");
    assert!(res.namespaced);
}
