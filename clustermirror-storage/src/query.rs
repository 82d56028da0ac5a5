//! Query translation.
//!
//! Read requests are translated into predicates over the indexed identity
//! columns only. Object bodies are not searchable: a label selector, or a
//! field selector on anything but `metadata.name` / `metadata.namespace`,
//! is rejected as unsupported.

use crate::error::{StorageError, StorageResult};
use clustermirror_types::CollectionResourceType;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Options of a `list` read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Restrict to these clusters; empty means every cluster.
    pub clusters: Vec<String>,
    /// Restrict to these namespaces; empty means every namespace.
    pub namespaces: Vec<String>,
    /// Restrict to these object names.
    pub names: Vec<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<usize>,
    /// Opaque token returned by a previous page.
    pub continue_token: Option<String>,
}

impl ListOptions {
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            clusters: vec![cluster.into()],
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_continue(mut self, token: impl Into<String>) -> Self {
        self.continue_token = Some(token.into());
        self
    }

    pub(crate) fn offset(&self) -> StorageResult<usize> {
        match self.continue_token.as_deref() {
            None | Some("") => Ok(0),
            Some(token) => token
                .parse::<i64>()
                .ok()
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or_else(|| StorageError::Unsupported(format!("invalid continue token {token:?}"))),
        }
    }
}

/// One page of decoded objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectList {
    pub items: Vec<Value>,
    /// Set when more items follow; pass back as `ListOptions::continue_token`.
    pub continue_token: Option<String>,
}

/// Which kinds a query targets.
#[derive(Debug, Clone)]
pub(crate) enum KindFilter<'a> {
    Exact {
        group: &'a str,
        version: &'a str,
        resource: &'a str,
    },
    Collection(&'a CollectionResourceType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldOp {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRequirement {
    column: &'static str,
    op: FieldOp,
    value: String,
}

fn parse_field_selector(selector: &str) -> StorageResult<Vec<FieldRequirement>> {
    let mut requirements = Vec::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
            (k, FieldOp::NotEq, v)
        } else if let Some((k, v)) = term.split_once("==") {
            (k, FieldOp::Eq, v)
        } else if let Some((k, v)) = term.split_once('=') {
            (k, FieldOp::Eq, v)
        } else {
            return Err(StorageError::Unsupported(format!("invalid field selector {term:?}")));
        };
        let column = match key.trim() {
            "metadata.name" => "name",
            "metadata.namespace" => "namespace",
            other => {
                return Err(StorageError::Unsupported(format!(
                    "field selector on {other:?} requires inspecting object bodies"
                )));
            }
        };
        requirements.push(FieldRequirement {
            column,
            op,
            value: value.trim().to_string(),
        });
    }
    Ok(requirements)
}

/// A SQL `WHERE` clause with its positional parameters.
#[derive(Debug, Default)]
pub(crate) struct Predicate {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    pub(crate) fn eq(&mut self, column: &str, value: &str) {
        self.params.push(SqlValue::Text(value.to_string()));
        self.clauses.push(format!("{column} = ?{}", self.params.len()));
    }

    fn not_eq(&mut self, column: &str, value: &str) {
        self.params.push(SqlValue::Text(value.to_string()));
        self.clauses.push(format!("{column} != ?{}", self.params.len()));
    }

    fn in_list(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            self.params.push(SqlValue::Text(value.clone()));
            placeholders.push(format!("?{}", self.params.len()));
        }
        self.clauses
            .push(format!("{column} IN ({})", placeholders.join(", ")));
    }

    fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Translates a kind filter plus list options into a predicate over live rows.
pub(crate) fn build_predicate(kind: &KindFilter<'_>, opts: &ListOptions) -> StorageResult<Predicate> {
    if let Some(selector) = opts.label_selector.as_deref() {
        if !selector.trim().is_empty() {
            return Err(StorageError::Unsupported(
                "label selectors require inspecting object bodies".to_string(),
            ));
        }
    }

    let mut predicate = Predicate::default();
    match kind {
        KindFilter::Exact {
            group,
            version,
            resource,
        } => {
            predicate.eq("\"group\"", group);
            predicate.eq("version", version);
            predicate.eq("resource", resource);
        }
        KindFilter::Collection(rt) => {
            predicate.eq("\"group\"", &rt.group);
            if !rt.version.is_empty() {
                predicate.eq("version", &rt.version);
            }
            predicate.eq("resource", &rt.resource);
        }
    }

    predicate.in_list("cluster", &opts.clusters);
    predicate.in_list("namespace", &opts.namespaces);
    predicate.in_list("name", &opts.names);

    if let Some(selector) = opts.field_selector.as_deref() {
        for req in parse_field_selector(selector)? {
            match req.op {
                FieldOp::Eq => predicate.eq(req.column, &req.value),
                FieldOp::NotEq => predicate.not_eq(req.column, &req.value),
            }
        }
    }

    predicate.raw("deleted_at IS NULL");
    Ok(predicate)
}
