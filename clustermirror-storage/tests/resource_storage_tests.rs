use clustermirror_storage::{
    CollectionRegistry, ListOptions, ResourceStorage, SqliteStorageFactory, StorageFactory, UpsertOutcome,
};
use clustermirror_types::{ApiResource, GroupResource, GroupVersionResource, Scheme};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn make_factory() -> SqliteStorageFactory {
    SqliteStorageFactory::in_memory(Arc::new(Scheme::default()), CollectionRegistry::new()).unwrap()
}

fn deployments() -> ApiResource {
    ApiResource::new(GroupVersionResource::new("apps", "v1", "deployments"), "Deployment", true)
}

fn pods() -> ApiResource {
    ApiResource::new(GroupVersionResource::new("", "v1", "pods"), "Pod", true)
}

fn make_storage(factory: &SqliteStorageFactory, resource: &ApiResource) -> Arc<dyn ResourceStorage> {
    let scheme = Scheme::default();
    factory
        .new_resource_storage(scheme.resource_config(resource))
        .unwrap()
}

fn make_object(namespace: &str, name: &str, rv: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": format!("uid-{namespace}-{name}"),
            "resourceVersion": rv,
            "creationTimestamp": "2024-01-02T03:04:05Z",
        },
        "spec": {"replicas": 1},
    })
}

fn names(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .map(|o| o["metadata"]["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ── Upsert ───────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_same_object_twice_only_refreshes() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let gvr = deployments().gvr;
    let obj = make_object("default", "web", "10");

    assert_eq!(storage.upsert("c1", &obj).await.unwrap(), UpsertOutcome::Inserted);
    let first = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();

    assert_eq!(storage.upsert("c1", &obj).await.unwrap(), UpsertOutcome::Refreshed);
    let second = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.object, second.object);
    assert_eq!(first.resource_version, second.resource_version);
    assert_eq!(first.created_at, second.created_at);
    assert!(second.synced_at >= first.synced_at);
    assert_eq!(factory.count_rows("c1").await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_newer_version_updates_in_place() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let gvr = deployments().gvr;

    storage.upsert("c1", &make_object("default", "web", "10")).await.unwrap();
    let before = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();

    let mut updated = make_object("default", "web", "11");
    updated["spec"]["replicas"] = json!(3);
    assert_eq!(storage.upsert("c1", &updated).await.unwrap(), UpsertOutcome::Updated);

    let after = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(after.resource_version.as_str(), "11");
    assert_eq!(storage.get("c1", "default", "web").await.unwrap()["spec"]["replicas"], 3);
}

#[tokio::test]
async fn upsert_older_version_is_conflict() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());

    storage.upsert("c1", &make_object("default", "web", "20")).await.unwrap();
    let err = storage
        .upsert("c1", &make_object("default", "web", "19"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("c1/apps/v1/deployments"));

    let stored = storage.get("c1", "default", "web").await.unwrap();
    assert_eq!(stored["metadata"]["resourceVersion"], "20");
}

#[tokio::test]
async fn upsert_without_name_is_internal_error() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let err = storage
        .upsert("c1", &json!({"metadata": {"namespace": "x"}}))
        .await
        .unwrap_err();
    assert!(!err.is_conflict() && !err.is_not_found());
}

// ── Identity ─────────────────────────────────────────────────────

#[tokio::test]
async fn same_name_in_different_clusters_does_not_collide() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let obj = make_object("default", "web", "1");

    assert_eq!(storage.upsert("c1", &obj).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(storage.upsert("c2", &obj).await.unwrap(), UpsertOutcome::Inserted);

    let all = storage.list(&ListOptions::default()).await.unwrap();
    assert_eq!(all.items.len(), 2);
}

#[tokio::test]
async fn same_name_of_different_kind_does_not_collide() {
    let factory = make_factory();
    let deploys = make_storage(&factory, &deployments());
    let pod_storage = make_storage(&factory, &pods());

    let mut pod = make_object("default", "web", "1");
    pod["apiVersion"] = json!("v1");
    pod["kind"] = json!("Pod");

    deploys.upsert("c1", &make_object("default", "web", "1")).await.unwrap();
    assert_eq!(pod_storage.upsert("c1", &pod).await.unwrap(), UpsertOutcome::Inserted);

    assert_eq!(deploys.get("c1", "default", "web").await.unwrap()["kind"], "Deployment");
    assert_eq!(pod_storage.get("c1", "default", "web").await.unwrap()["kind"], "Pod");
}

#[tokio::test]
async fn oversized_identity_is_unsupported() {
    let factory = make_factory();
    let long_group = "g".repeat(64);
    let resource = ApiResource::new(GroupVersionResource::new(long_group, "v1", "things"), "Thing", true);
    let err = factory
        .new_resource_storage(Scheme::default().resource_config(&resource))
        .err()
        .unwrap();
    assert!(err.is_unsupported());

    let resource = ApiResource::new(
        GroupVersionResource::new("example.io", "v1alpha1beta1gamma", "things"),
        "Thing",
        true,
    );
    assert!(factory
        .new_resource_storage(Scheme::default().resource_config(&resource))
        .is_err());
}

// ── Soft delete ──────────────────────────────────────────────────

#[tokio::test]
async fn mark_deleted_hides_object_but_keeps_tombstone() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let gvr = deployments().gvr;

    storage.upsert("c1", &make_object("default", "web", "5")).await.unwrap();
    storage
        .mark_deleted("c1", &make_object("default", "web", "6"))
        .await
        .unwrap();

    assert!(storage.get("c1", "default", "web").await.unwrap_err().is_not_found());
    assert!(storage.list(&ListOptions::default()).await.unwrap().items.is_empty());
    assert!(factory.resource_versions("c1").await.unwrap().is_empty());

    let tombstone = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();
    assert!(tombstone.deleted_at.is_some());
    assert_eq!(tombstone.resource_version.as_str(), "6");
}

#[tokio::test]
async fn upsert_revives_tombstone() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let gvr = deployments().gvr;

    storage.upsert("c1", &make_object("default", "web", "5")).await.unwrap();
    storage.mark_deleted("c1", &make_object("default", "web", "6")).await.unwrap();
    let outcome = storage.upsert("c1", &make_object("default", "web", "7")).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);

    let record = factory.find_record(&gvr, "c1", "default", "web").await.unwrap().unwrap();
    assert!(record.deleted_at.is_none());
    assert!(storage.get("c1", "default", "web").await.is_ok());
}

#[tokio::test]
async fn mark_deleted_missing_object_is_not_found() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let err = storage
        .mark_deleted("c1", &make_object("default", "ghost", "1"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn purge_tombstones_leaves_live_rows() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());

    storage.upsert("c1", &make_object("default", "a", "1")).await.unwrap();
    storage.upsert("c1", &make_object("default", "b", "1")).await.unwrap();
    storage.mark_deleted("c1", &make_object("default", "b", "2")).await.unwrap();

    let removed = factory
        .purge_tombstones(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(factory.count_rows("c1").await.unwrap(), 1);
    assert!(storage.get("c1", "default", "a").await.is_ok());
}

// ── Purge ────────────────────────────────────────────────────────

#[tokio::test]
async fn purge_cluster_is_isolated() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());

    for cluster in ["c1", "c2"] {
        for name in ["a", "b", "c"] {
            storage.upsert(cluster, &make_object("default", name, "1")).await.unwrap();
        }
    }
    storage.mark_deleted("c1", &make_object("default", "c", "2")).await.unwrap();

    assert_eq!(factory.purge_cluster("c1").await.unwrap(), 3);
    assert_eq!(factory.count_rows("c1").await.unwrap(), 0);
    assert_eq!(factory.count_rows("c2").await.unwrap(), 3);
}

#[tokio::test]
async fn purge_cluster_resource_only_touches_that_kind() {
    let factory = make_factory();
    let deploys = make_storage(&factory, &deployments());
    let pod_storage = make_storage(&factory, &pods());

    deploys.upsert("c1", &make_object("default", "web", "1")).await.unwrap();
    pod_storage.upsert("c1", &make_object("default", "web-0", "1")).await.unwrap();

    let removed = factory
        .purge_cluster_resource("c1", &deployments().gvr)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(pod_storage.get("c1", "default", "web-0").await.is_ok());
}

// ── Cursors and stats ────────────────────────────────────────────

#[tokio::test]
async fn resource_versions_reflect_committed_live_rows() {
    let factory = make_factory();
    let deploys = make_storage(&factory, &deployments());
    let pod_storage = make_storage(&factory, &pods());

    deploys.upsert("c1", &make_object("default", "web", "7")).await.unwrap();
    deploys.upsert("c2", &make_object("default", "other", "9")).await.unwrap();
    pod_storage.upsert("c1", &make_object("", "node-pod", "3")).await.unwrap();

    let versions = factory.resource_versions("c1").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[&deployments().gvr]["default/web"].as_str(), "7");
    assert_eq!(versions[&pods().gvr]["node-pod"].as_str(), "3");
}

#[tokio::test]
async fn cluster_stats_count_live_rows() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    storage.upsert("c1", &make_object("default", "a", "1")).await.unwrap();
    storage.upsert("c1", &make_object("default", "b", "1")).await.unwrap();
    storage.upsert("c2", &make_object("default", "a", "1")).await.unwrap();
    storage.mark_deleted("c1", &make_object("default", "b", "2")).await.unwrap();

    let stats = factory.cluster_stats().await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!((stats[0].cluster.as_str(), stats[0].count), ("c1", 1));
    assert_eq!((stats[1].cluster.as_str(), stats[1].count), ("c2", 1));
}

// ── Queries ──────────────────────────────────────────────────────

#[tokio::test]
async fn list_filters_by_cluster_and_namespace() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    storage.upsert("c1", &make_object("default", "a", "1")).await.unwrap();
    storage.upsert("c1", &make_object("kube-system", "b", "1")).await.unwrap();
    storage.upsert("c2", &make_object("default", "c", "1")).await.unwrap();

    let c1 = storage.list(&ListOptions::for_cluster("c1")).await.unwrap();
    assert_eq!(names(&c1.items), vec!["a", "b"]);

    let default_ns = storage
        .list(&ListOptions::default().with_namespace("default"))
        .await
        .unwrap();
    assert_eq!(names(&default_ns.items), vec!["a", "c"]);
}

#[tokio::test]
async fn list_field_selector_on_identity_columns() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    for name in ["a", "b", "c"] {
        storage.upsert("c1", &make_object("default", name, "1")).await.unwrap();
    }

    let opts = ListOptions {
        field_selector: Some("metadata.name!=b".into()),
        ..Default::default()
    };
    assert_eq!(names(&storage.list(&opts).await.unwrap().items), vec!["a", "c"]);

    let opts = ListOptions {
        field_selector: Some("spec.replicas=1".into()),
        ..Default::default()
    };
    assert!(storage.list(&opts).await.unwrap_err().is_unsupported());
}

#[tokio::test]
async fn list_label_selector_is_unsupported() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    let opts = ListOptions {
        label_selector: Some("app=web".into()),
        ..Default::default()
    };
    assert!(storage.list(&opts).await.unwrap_err().is_unsupported());
}

#[tokio::test]
async fn list_paginates_with_continue_token() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    for name in ["e", "a", "d", "b", "c"] {
        storage.upsert("c1", &make_object("default", name, "1")).await.unwrap();
    }

    let first = storage.list(&ListOptions::default().with_limit(2)).await.unwrap();
    assert_eq!(names(&first.items), vec!["a", "b"]);
    let token = first.continue_token.unwrap();

    let second = storage
        .list(&ListOptions::default().with_limit(2).with_continue(token))
        .await
        .unwrap();
    assert_eq!(names(&second.items), vec!["c", "d"]);

    let third = storage
        .list(&ListOptions::default().with_limit(2).with_continue(second.continue_token.unwrap()))
        .await
        .unwrap();
    assert_eq!(names(&third.items), vec!["e"]);
    assert!(third.continue_token.is_none());
}

#[tokio::test]
async fn list_with_huge_limit_returns_everything() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    for name in ["a", "b", "c"] {
        storage.upsert("c1", &make_object("default", name, "1")).await.unwrap();
    }

    let list = storage.list(&ListOptions::default().with_limit(usize::MAX)).await.unwrap();
    assert_eq!(names(&list.items), vec!["a", "b", "c"]);
    assert!(list.continue_token.is_none());

    let tail = storage
        .list(&ListOptions::default().with_limit(usize::MAX).with_continue("2"))
        .await
        .unwrap();
    assert_eq!(names(&tail.items), vec!["c"]);
}

#[tokio::test]
async fn list_with_out_of_range_continue_is_unsupported() {
    let factory = make_factory();
    let storage = make_storage(&factory, &deployments());
    storage.upsert("c1", &make_object("default", "a", "1")).await.unwrap();

    let opts = ListOptions::default().with_limit(2).with_continue(usize::MAX.to_string());
    assert!(storage.list(&opts).await.unwrap_err().is_unsupported());

    // Largest accepted offset is past every row.
    let opts = ListOptions::default().with_limit(2).with_continue(i64::MAX.to_string());
    let list = storage.list(&opts).await.unwrap();
    assert!(list.items.is_empty());
    assert!(list.continue_token.is_none());
}

// ── Versions ─────────────────────────────────────────────────────

#[tokio::test]
async fn storage_version_override_is_converted_on_read() {
    let scheme = Arc::new(
        Scheme::builder()
            .storage_version(GroupResource::new("apps", "deployments"), "v1beta2")
            .build(),
    );
    let factory = SqliteStorageFactory::in_memory(Arc::clone(&scheme), CollectionRegistry::new()).unwrap();
    let storage = factory
        .new_resource_storage(scheme.resource_config(&deployments()))
        .unwrap();

    storage.upsert("c1", &make_object("default", "web", "1")).await.unwrap();

    let stored_gvr = GroupVersionResource::new("apps", "v1beta2", "deployments");
    let record = factory.find_record(&stored_gvr, "c1", "default", "web").await.unwrap().unwrap();
    let body: Value = serde_json::from_slice(&record.object).unwrap();
    assert_eq!(body["apiVersion"], "apps/v1beta2");

    let served = storage.get("c1", "default", "web").await.unwrap();
    assert_eq!(served["apiVersion"], "apps/v1");
}
