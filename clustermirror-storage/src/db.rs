//! Connection management and row-level SQL for the `resources` table.
//!
//! The unique index on (group, version, resource, cluster, namespace, name)
//! is the only concurrency control: writers for different clusters never
//! coordinate outside of it.

use crate::error::{interpret, StorageError, StorageResult};
use crate::query::Predicate;
use crate::record::{ClusterResourceCount, ResourceRecord, ResourceVersionMap, UpsertOutcome};
use chrono::{DateTime, SecondsFormat, Utc};
use clustermirror_types::{GroupVersionResource, ResourceVersion};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        "group" TEXT NOT NULL,
        version TEXT NOT NULL,
        resource TEXT NOT NULL,
        kind TEXT NOT NULL,
        cluster TEXT NOT NULL,
        namespace TEXT NOT NULL,
        name TEXT NOT NULL,
        uid TEXT NOT NULL,
        resource_version TEXT NOT NULL,
        object BLOB NOT NULL,
        created_at TEXT NOT NULL,
        synced_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uni_group_version_resource_cluster_namespace_name
        ON resources ("group", version, resource, cluster, namespace, name);

    CREATE INDEX IF NOT EXISTS idx_resources_cluster ON resources (cluster);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity key of a mirrored object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectIdentity<'a> {
    pub gvr: &'a GroupVersionResource,
    pub cluster: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl ObjectIdentity<'_> {
    pub(crate) fn context(&self) -> String {
        format!("{}/{}", self.cluster, self.gvr)
    }
}

/// A row to be upserted.
#[derive(Debug)]
pub(crate) struct NewRow<'a> {
    pub identity: ObjectIdentity<'a>,
    pub kind: &'a str,
    pub uid: &'a str,
    pub resource_version: &'a ResourceVersion,
    pub object: &'a [u8],
    pub created_at: DateTime<Utc>,
}

/// A live row returned by a list query.
#[derive(Debug, Clone)]
pub(crate) struct ListedRow {
    pub gvr: GroupVersionResource,
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub object: Vec<u8>,
}

impl ListedRow {
    /// Deterministic order shared by resource and collection lists.
    pub(crate) fn sort_key(&self) -> (&str, &str, &str, &str, &GroupVersionResource) {
        (&self.cluster, &self.namespace, &self.name, &self.uid, &self.gvr)
    }
}

pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// SQLite handle: one writer and, for file databases, a separate reader so
/// list traffic does not queue behind synchronization writes.
pub(crate) struct Database {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) a database file in WAL mode.
    pub(crate) fn open(path: &Path) -> StorageResult<Self> {
        let context = path.display().to_string();
        let writer = Connection::open(path).map_err(interpret(context.clone()))?;
        writer
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(interpret(context.clone()))?;
        let _mode: String = writer
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(interpret(context.clone()))?;
        writer
            .execute_batch(SCHEMA)
            .map_err(interpret(context.clone()))?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(interpret(context.clone()))?;
        reader
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(interpret(context))?;

        debug!(path = %path.display(), "Opened resource database");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Opens a private in-memory database.
    pub(crate) fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(interpret(":memory:"))?;
        conn.execute_batch(SCHEMA).map_err(interpret(":memory:"))?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    pub(crate) fn writer(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::internal("database", "writer connection poisoned"))
    }

    pub(crate) fn reader(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|_| StorageError::internal("database", "reader connection poisoned")),
            None => self.writer(),
        }
    }
}

const IDENTITY_WHERE: &str =
    "\"group\" = ?1 AND version = ?2 AND resource = ?3 AND cluster = ?4 AND namespace = ?5 AND name = ?6";

// ── Writes ───────────────────────────────────────────────────────

/// Inserts or replaces the row for `row.identity`.
///
/// Re-applying the stored version with the stored body only refreshes
/// `synced_at`. A version older than the stored one is a conflict and
/// leaves the row untouched.
pub(crate) fn upsert(conn: &mut Connection, row: &NewRow<'_>) -> StorageResult<UpsertOutcome> {
    let id = row.identity;
    let context = id.context();
    let now = timestamp(Utc::now());
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(interpret(context.clone()))?;

    let existing: Option<(String, Vec<u8>, Option<String>)> = tx
        .query_row(
            &format!("SELECT resource_version, object, deleted_at FROM resources WHERE {IDENTITY_WHERE}"),
            params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(interpret(context.clone()))?;

    let outcome = match existing {
        None => {
            tx.execute(
                "INSERT INTO resources (\"group\", version, resource, kind, cluster, namespace, name, uid, \
                 resource_version, object, created_at, synced_at, deleted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL)",
                params![
                    id.gvr.group,
                    id.gvr.version,
                    id.gvr.resource,
                    row.kind,
                    id.cluster,
                    id.namespace,
                    id.name,
                    row.uid,
                    row.resource_version.as_str(),
                    row.object,
                    timestamp(row.created_at),
                    now,
                ],
            )
            .map_err(interpret(context.clone()))?;
            UpsertOutcome::Inserted
        }
        Some((stored_rv, stored_object, deleted_at)) => {
            let stored_rv = ResourceVersion::new(stored_rv);
            if row.resource_version.is_older_than(&stored_rv) {
                return Err(StorageError::conflict(
                    context,
                    format!(
                        "{}/{} has resource version {stored_rv}, refusing older {}",
                        id.namespace, id.name, row.resource_version
                    ),
                ));
            }
            if stored_rv == *row.resource_version && stored_object == row.object && deleted_at.is_none() {
                tx.execute(
                    &format!("UPDATE resources SET synced_at = ?7 WHERE {IDENTITY_WHERE}"),
                    params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name, now],
                )
                .map_err(interpret(context.clone()))?;
                UpsertOutcome::Refreshed
            } else {
                tx.execute(
                    &format!(
                        "UPDATE resources SET kind = ?7, uid = ?8, resource_version = ?9, object = ?10, \
                         created_at = ?11, synced_at = ?12, deleted_at = NULL WHERE {IDENTITY_WHERE}"
                    ),
                    params![
                        id.gvr.group,
                        id.gvr.version,
                        id.gvr.resource,
                        id.cluster,
                        id.namespace,
                        id.name,
                        row.kind,
                        row.uid,
                        row.resource_version.as_str(),
                        row.object,
                        timestamp(row.created_at),
                        now,
                    ],
                )
                .map_err(interpret(context.clone()))?;
                UpsertOutcome::Updated
            }
        }
    };

    tx.commit().map_err(interpret(context))?;
    Ok(outcome)
}

/// Turns the live row for `id` into a tombstone.
pub(crate) fn mark_deleted(
    conn: &mut Connection,
    id: ObjectIdentity<'_>,
    resource_version: &ResourceVersion,
) -> StorageResult<()> {
    let context = id.context();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(interpret(context.clone()))?;

    let stored: Option<String> = tx
        .query_row(
            &format!("SELECT resource_version FROM resources WHERE {IDENTITY_WHERE} AND deleted_at IS NULL"),
            params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name],
            |r| r.get(0),
        )
        .optional()
        .map_err(interpret(context.clone()))?;

    let Some(stored) = stored else {
        return Err(StorageError::not_found(context, format!("{}/{}", id.namespace, id.name)));
    };
    let stored = ResourceVersion::new(stored);
    if resource_version.is_older_than(&stored) {
        return Err(StorageError::conflict(
            context,
            format!("delete at {resource_version} is older than stored {stored}"),
        ));
    }
    let version = if resource_version.is_empty() { &stored } else { resource_version };

    let now = timestamp(Utc::now());
    tx.execute(
        &format!("UPDATE resources SET deleted_at = ?7, synced_at = ?7, resource_version = ?8 WHERE {IDENTITY_WHERE}"),
        params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name, now, version.as_str()],
    )
    .map_err(interpret(context.clone()))?;
    tx.commit().map_err(interpret(context))?;
    Ok(())
}

pub(crate) fn purge_cluster(conn: &Connection, cluster: &str) -> StorageResult<u64> {
    let n = conn
        .execute("DELETE FROM resources WHERE cluster = ?1", params![cluster])
        .map_err(interpret(cluster))?;
    Ok(n as u64)
}

pub(crate) fn purge_cluster_resource(
    conn: &Connection,
    cluster: &str,
    gvr: &GroupVersionResource,
) -> StorageResult<u64> {
    let n = conn
        .execute(
            "DELETE FROM resources WHERE cluster = ?1 AND \"group\" = ?2 AND version = ?3 AND resource = ?4",
            params![cluster, gvr.group, gvr.version, gvr.resource],
        )
        .map_err(interpret(format!("{cluster}/{gvr}")))?;
    Ok(n as u64)
}

pub(crate) fn purge_tombstones(conn: &Connection, older_than: DateTime<Utc>) -> StorageResult<u64> {
    let n = conn
        .execute(
            "DELETE FROM resources WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            params![timestamp(older_than)],
        )
        .map_err(interpret("tombstones"))?;
    Ok(n as u64)
}

// ── Reads ────────────────────────────────────────────────────────

pub(crate) fn get_object(conn: &Connection, id: ObjectIdentity<'_>) -> StorageResult<Vec<u8>> {
    conn.query_row(
        &format!("SELECT object FROM resources WHERE {IDENTITY_WHERE} AND deleted_at IS NULL"),
        params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name],
        |r| r.get(0),
    )
    .optional()
    .map_err(interpret(id.context()))?
    .ok_or_else(|| StorageError::not_found(id.context(), format!("{}/{}", id.namespace, id.name)))
}

pub(crate) fn list_rows(
    conn: &Connection,
    predicate: &Predicate,
    limit: Option<usize>,
    offset: usize,
    context: &str,
) -> StorageResult<Vec<ListedRow>> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let sql = format!(
        "SELECT \"group\", version, resource, cluster, namespace, name, uid, object FROM resources {} \
         ORDER BY cluster, namespace, name, uid, \"group\", version, resource LIMIT {limit} OFFSET {offset}",
        predicate.where_sql()
    );
    let mut stmt = conn.prepare(&sql).map_err(interpret(context))?;
    let rows = stmt
        .query_map(params_from_iter(predicate.params().iter()), |r| {
            Ok(ListedRow {
                gvr: GroupVersionResource::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ),
                cluster: r.get(3)?,
                namespace: r.get(4)?,
                name: r.get(5)?,
                uid: r.get(6)?,
                object: r.get(7)?,
            })
        })
        .map_err(interpret(context))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(interpret(context))?);
    }
    Ok(result)
}

pub(crate) fn resource_versions(conn: &Connection, cluster: &str) -> StorageResult<ResourceVersionMap> {
    let mut stmt = conn
        .prepare(
            "SELECT \"group\", version, resource, namespace, name, resource_version FROM resources \
             WHERE cluster = ?1 AND deleted_at IS NULL",
        )
        .map_err(interpret(cluster))?;
    let rows = stmt
        .query_map(params![cluster], |r| {
            Ok((
                GroupVersionResource::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ),
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .map_err(interpret(cluster))?;

    let mut versions = ResourceVersionMap::new();
    for row in rows {
        let (gvr, namespace, name, rv) = row.map_err(interpret(cluster))?;
        versions
            .entry(gvr)
            .or_default()
            .insert(clustermirror_types::object_key(&namespace, &name), ResourceVersion::new(rv));
    }
    Ok(versions)
}

pub(crate) fn cluster_stats(conn: &Connection) -> StorageResult<Vec<ClusterResourceCount>> {
    let mut stmt = conn
        .prepare(
            "SELECT cluster, \"group\", version, resource, COUNT(*) FROM resources WHERE deleted_at IS NULL \
             GROUP BY cluster, \"group\", version, resource ORDER BY cluster, \"group\", version, resource",
        )
        .map_err(interpret("stats"))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClusterResourceCount {
                cluster: r.get(0)?,
                gvr: GroupVersionResource::new(
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ),
                count: r.get::<_, i64>(4)? as u64,
            })
        })
        .map_err(interpret("stats"))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(interpret("stats"))?);
    }
    Ok(result)
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<ResourceRecord> {
    let deleted_at: Option<String> = r.get(13)?;
    Ok(ResourceRecord {
        id: r.get(0)?,
        gvr: GroupVersionResource::new(
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
        ),
        kind: r.get(4)?,
        cluster: r.get(5)?,
        namespace: r.get(6)?,
        name: r.get(7)?,
        uid: r.get(8)?,
        resource_version: ResourceVersion::new(r.get::<_, String>(9)?),
        object: r.get(10)?,
        created_at: parse_timestamp(&r.get::<_, String>(11)?)?,
        synced_at: parse_timestamp(&r.get::<_, String>(12)?)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Reads a row by identity, tombstones included.
pub(crate) fn find_record(conn: &Connection, id: ObjectIdentity<'_>) -> StorageResult<Option<ResourceRecord>> {
    conn.query_row(
        &format!(
            "SELECT id, \"group\", version, resource, kind, cluster, namespace, name, uid, resource_version, \
             object, created_at, synced_at, deleted_at FROM resources WHERE {IDENTITY_WHERE}"
        ),
        params![id.gvr.group, id.gvr.version, id.gvr.resource, id.cluster, id.namespace, id.name],
        record_from_row,
    )
    .optional()
    .map_err(interpret(id.context()))
}

/// Counts rows of a cluster, tombstones included.
pub(crate) fn count_rows(conn: &Connection, cluster: &str) -> StorageResult<u64> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM resources WHERE cluster = ?1",
            params![cluster],
            |r| r.get(0),
        )
        .map_err(interpret(cluster))?;
    Ok(n as u64)
}
