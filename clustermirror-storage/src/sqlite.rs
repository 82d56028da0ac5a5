//! SQLite-backed storage factory and adapters.

use crate::collection::CollectionRegistry;
use crate::db::{self, Database, ListedRow, NewRow, ObjectIdentity};
use crate::error::{StorageError, StorageResult};
use crate::query::{build_predicate, KindFilter, ListOptions, ObjectList};
use crate::record::{ClusterResourceCount, ResourceRecord, ResourceVersionMap, UpsertOutcome};
use crate::storage::{CollectionList, CollectionStorage, ResourceStorage, StorageFactory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clustermirror_types::{
    CollectionResource, GroupVersionResource, ObjectMeta, ResourceStorageConfig, Scheme,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_GROUP_LEN: usize = 63;
const MAX_VERSION_LEN: usize = 15;
const MAX_RESOURCE_LEN: usize = 63;
const MAX_KIND_LEN: usize = 63;

/// Runs a blocking database call off the async runtime.
async fn blocking<T, F>(context: String, f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::internal(context, format!("storage task failed: {e}")))?
}

fn check_len(field: &str, value: &str, max: usize) -> StorageResult<()> {
    if value.len() > max {
        return Err(StorageError::Unsupported(format!(
            "{field} {value:?} exceeds {max} characters"
        )));
    }
    Ok(())
}

pub struct SqliteStorageFactory {
    db: Arc<Database>,
    scheme: Arc<Scheme>,
    collections: CollectionRegistry,
}

impl SqliteStorageFactory {
    /// Opens a file-backed store.
    pub fn open(path: &Path, scheme: Arc<Scheme>, collections: CollectionRegistry) -> StorageResult<Self> {
        let db = Database::open(path)?;
        info!(path = %path.display(), "SQLite storage ready");
        Ok(Self {
            db: Arc::new(db),
            scheme,
            collections,
        })
    }

    /// A private in-memory store; contents are lost when dropped.
    pub fn in_memory(scheme: Arc<Scheme>, collections: CollectionRegistry) -> StorageResult<Self> {
        Ok(Self {
            db: Arc::new(Database::open_in_memory()?),
            scheme,
            collections,
        })
    }

    /// Reads a row by identity, tombstones included.
    pub async fn find_record(
        &self,
        gvr: &GroupVersionResource,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> StorageResult<Option<ResourceRecord>> {
        let db = Arc::clone(&self.db);
        let (gvr, cluster, namespace, name) =
            (gvr.clone(), cluster.to_string(), namespace.to_string(), name.to_string());
        blocking(cluster.clone(), move || {
            let conn = db.reader()?;
            db::find_record(
                &conn,
                ObjectIdentity {
                    gvr: &gvr,
                    cluster: &cluster,
                    namespace: &namespace,
                    name: &name,
                },
            )
        })
        .await
    }

    /// Number of rows stored for `cluster`, tombstones included.
    pub async fn count_rows(&self, cluster: &str) -> StorageResult<u64> {
        let db = Arc::clone(&self.db);
        let cluster = cluster.to_string();
        blocking(cluster.clone(), move || db::count_rows(&*db.reader()?, &cluster)).await
    }
}

#[async_trait]
impl StorageFactory for SqliteStorageFactory {
    fn new_resource_storage(&self, config: ResourceStorageConfig) -> StorageResult<Arc<dyn ResourceStorage>> {
        let gvr = config.storage_gvr();
        check_len("group", &gvr.group, MAX_GROUP_LEN)?;
        check_len("version", &gvr.version, MAX_VERSION_LEN)?;
        check_len("resource", &gvr.resource, MAX_RESOURCE_LEN)?;
        check_len("kind", &config.resource.kind, MAX_KIND_LEN)?;
        debug!(resource = %gvr, "Created resource storage");
        Ok(Arc::new(SqliteResourceStorage {
            db: Arc::clone(&self.db),
            gvr,
            config,
        }))
    }

    fn new_collection_storage(&self, collection: &CollectionResource) -> StorageResult<Arc<dyn CollectionStorage>> {
        let registered = self
            .collections
            .get(&collection.name)
            .ok_or_else(|| StorageError::Unsupported(format!("unsupported collection {}", collection.name)))?;
        Ok(Arc::new(SqliteCollectionStorage {
            db: Arc::clone(&self.db),
            scheme: Arc::clone(&self.scheme),
            collection: registered.clone(),
        }))
    }

    async fn resource_versions(&self, cluster: &str) -> StorageResult<ResourceVersionMap> {
        let db = Arc::clone(&self.db);
        let cluster = cluster.to_string();
        blocking(cluster.clone(), move || db::resource_versions(&*db.reader()?, &cluster)).await
    }

    async fn purge_cluster(&self, cluster: &str) -> StorageResult<u64> {
        let db = Arc::clone(&self.db);
        let owned = cluster.to_string();
        let removed = blocking(owned.clone(), move || db::purge_cluster(&*db.writer()?, &owned)).await?;
        info!(cluster, removed, "Purged cluster records");
        Ok(removed)
    }

    async fn purge_cluster_resource(&self, cluster: &str, gvr: &GroupVersionResource) -> StorageResult<u64> {
        let db = Arc::clone(&self.db);
        let (owned, gvr_owned) = (cluster.to_string(), gvr.clone());
        let removed = blocking(format!("{cluster}/{gvr}"), move || {
            db::purge_cluster_resource(&*db.writer()?, &owned, &gvr_owned)
        })
        .await?;
        info!(cluster, resource = %gvr, removed, "Purged resource records");
        Ok(removed)
    }

    async fn purge_tombstones(&self, older_than: DateTime<Utc>) -> StorageResult<u64> {
        let db = Arc::clone(&self.db);
        blocking("tombstones".to_string(), move || db::purge_tombstones(&*db.writer()?, older_than)).await
    }

    async fn cluster_stats(&self) -> StorageResult<Vec<ClusterResourceCount>> {
        let db = Arc::clone(&self.db);
        blocking("stats".to_string(), move || db::cluster_stats(&*db.reader()?)).await
    }

    fn collections(&self) -> Vec<CollectionResource> {
        self.collections.all().to_vec()
    }
}

// ── Resource adapter ─────────────────────────────────────────────

struct SqliteResourceStorage {
    db: Arc<Database>,
    /// Storage-version key of the rows this adapter owns.
    gvr: GroupVersionResource,
    config: ResourceStorageConfig,
}

impl SqliteResourceStorage {
    fn context(&self, cluster: &str) -> String {
        format!("{cluster}/{}", self.gvr)
    }

    fn meta(&self, cluster: &str, object: &Value) -> StorageResult<ObjectMeta> {
        ObjectMeta::from_object(object).map_err(|e| StorageError::internal(self.context(cluster), e))
    }
}

#[async_trait]
impl ResourceStorage for SqliteResourceStorage {
    fn config(&self) -> &ResourceStorageConfig {
        &self.config
    }

    async fn upsert(&self, cluster: &str, object: &Value) -> StorageResult<UpsertOutcome> {
        let context = self.context(cluster);
        let meta = self.meta(cluster, object)?;
        let encoded = self
            .config
            .codec
            .encode(object, &self.config.storage_version)
            .map_err(|e| StorageError::internal(context.clone(), e))?;
        let kind = self.config.resource.kind.clone();
        let created_at = meta.creation_timestamp.unwrap_or_else(Utc::now);

        let db = Arc::clone(&self.db);
        let gvr = self.gvr.clone();
        let cluster = cluster.to_string();
        let outcome = blocking(context, move || {
            let mut conn = db.writer()?;
            db::upsert(
                &mut conn,
                &NewRow {
                    identity: ObjectIdentity {
                        gvr: &gvr,
                        cluster: &cluster,
                        namespace: &meta.namespace,
                        name: &meta.name,
                    },
                    kind: &kind,
                    uid: &meta.uid,
                    resource_version: &meta.resource_version,
                    object: &encoded,
                    created_at,
                },
            )
        })
        .await?;
        Ok(outcome)
    }

    async fn mark_deleted(&self, cluster: &str, object: &Value) -> StorageResult<()> {
        let meta = self.meta(cluster, object)?;
        let db = Arc::clone(&self.db);
        let gvr = self.gvr.clone();
        let cluster = cluster.to_string();
        blocking(self.context(&cluster), move || {
            let mut conn = db.writer()?;
            db::mark_deleted(
                &mut conn,
                ObjectIdentity {
                    gvr: &gvr,
                    cluster: &cluster,
                    namespace: &meta.namespace,
                    name: &meta.name,
                },
                &meta.resource_version,
            )
        })
        .await
    }

    async fn get(&self, cluster: &str, namespace: &str, name: &str) -> StorageResult<Value> {
        let context = self.context(cluster);
        let db = Arc::clone(&self.db);
        let gvr = self.gvr.clone();
        let (cluster, namespace, name) = (cluster.to_string(), namespace.to_string(), name.to_string());
        let data = blocking(context.clone(), move || {
            let conn = db.reader()?;
            db::get_object(
                &conn,
                ObjectIdentity {
                    gvr: &gvr,
                    cluster: &cluster,
                    namespace: &namespace,
                    name: &name,
                },
            )
        })
        .await?;
        self.config
            .codec
            .decode(&data, &self.config.memory_version)
            .map_err(|e| StorageError::internal(context, e))
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ObjectList> {
        let context = self.gvr.to_string();
        let offset = opts.offset()?;
        let predicate = build_predicate(
            &KindFilter::Exact {
                group: &self.gvr.group,
                version: &self.gvr.version,
                resource: &self.gvr.resource,
            },
            opts,
        )?;
        let limit = opts.limit.filter(|l| *l > 0);
        let db = Arc::clone(&self.db);
        let ctx = context.clone();
        let mut rows = blocking(context.clone(), move || {
            db::list_rows(&*db.reader()?, &predicate, limit.map(|l| l.saturating_add(1)), offset, &ctx)
        })
        .await?;

        let continue_token = match limit {
            Some(limit) if rows.len() > limit => {
                rows.truncate(limit);
                Some(offset.saturating_add(limit).to_string())
            }
            _ => None,
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(
                self.config
                    .codec
                    .decode(&row.object, &self.config.memory_version)
                    .map_err(|e| StorageError::internal(format!("{}/{}", row.cluster, self.gvr), e))?,
            );
        }
        Ok(ObjectList { items, continue_token })
    }
}

// ── Collection adapter ───────────────────────────────────────────

struct SqliteCollectionStorage {
    db: Arc<Database>,
    scheme: Arc<Scheme>,
    collection: CollectionResource,
}

#[async_trait]
impl CollectionStorage for SqliteCollectionStorage {
    fn collection(&self) -> &CollectionResource {
        &self.collection
    }

    /// Fans out to every member kind, then merges into one order by
    /// (cluster, namespace, name, uid) so pages are stable across calls.
    async fn get(&self, opts: &ListOptions) -> StorageResult<CollectionList> {
        let context = self.collection.name.clone();
        let offset = opts.offset()?;
        let limit = opts.limit.filter(|l| *l > 0);
        // Each member must contribute enough rows to fill the merged window.
        let window = limit.map(|l| offset.saturating_add(l).saturating_add(1));

        let mut predicates = Vec::with_capacity(self.collection.resource_types.len());
        for rt in &self.collection.resource_types {
            let per_kind = ListOptions {
                continue_token: None,
                limit: None,
                ..opts.clone()
            };
            predicates.push(build_predicate(&KindFilter::Collection(rt), &per_kind)?);
        }

        let db = Arc::clone(&self.db);
        let ctx = context.clone();
        let mut rows: Vec<ListedRow> = blocking(context.clone(), move || {
            let conn = db.reader()?;
            let mut rows = Vec::new();
            for predicate in &predicates {
                rows.extend(db::list_rows(&conn, predicate, window, 0, &ctx)?);
            }
            Ok(rows)
        })
        .await?;

        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let end = limit.map_or(rows.len(), |l| offset.saturating_add(l).min(rows.len()));
        let continue_token = (end < rows.len()).then(|| end.to_string());
        let start = offset.min(end);

        let codec = self.scheme.codec();
        let mut items = Vec::with_capacity(end - start);
        for row in &rows[start..end] {
            items.push(
                codec
                    .decode(&row.object, &row.gvr.group_version())
                    .map_err(|e| StorageError::internal(format!("{}/{}", row.cluster, row.gvr), e))?,
            );
        }

        Ok(CollectionList {
            collection: self.collection.clone(),
            items,
            continue_token,
        })
    }
}
