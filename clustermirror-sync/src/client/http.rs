//! Kubernetes-compatible REST client.
//!
//! Lists page through `limit`/`continue`; watches are read as
//! newline-delimited JSON from a long-lived `?watch=true` response.
//! Each watch asks the server to end it after a randomized
//! `timeoutSeconds` and is abandoned client-side shortly after that, so a
//! half-open connection surfaces as a transient error instead of a stall.

use super::{ClusterClient, ListPage, WatchEvent, WatchStream};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use clustermirror_types::{ApiResource, GroupVersionResource, ResourceVersion};
use futures::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Lower bound of the server-side watch timeout; the actual value is
/// drawn from `[min, 2 * min)`.
const DEFAULT_MIN_WATCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Largest single watch event accepted.
const MAX_WATCH_LINE: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ApiResourceList {
    #[serde(default)]
    resources: Vec<RemoteResource>,
}

#[derive(Debug, Deserialize)]
struct RemoteResource {
    name: String,
    kind: String,
    namespaced: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    #[serde(default)]
    resource_version: String,
    #[serde(default, rename = "continue")]
    continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectListResponse {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    object: Value,
}

/// REST client for one member cluster.
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    server: String,
    token: Option<String>,
    client: Client,
    min_watch_timeout: Duration,
}

impl HttpClusterClient {
    pub fn new(server: impl Into<String>, token: Option<String>) -> SyncResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::Transient(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            server: server.into().trim_end_matches('/').to_string(),
            token,
            client,
            min_watch_timeout: DEFAULT_MIN_WATCH_TIMEOUT,
        })
    }

    /// Overrides the lower bound of the watch timeout. Values below one
    /// second are raised to one second.
    #[must_use]
    pub fn with_min_watch_timeout(mut self, timeout: Duration) -> Self {
        self.min_watch_timeout = timeout.max(Duration::from_secs(1));
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// A randomized server-side timeout, so watches across kinds and
    /// clusters do not all reconnect at once.
    fn watch_timeout(&self) -> Duration {
        let min = self.min_watch_timeout.as_secs().max(1);
        Duration::from_secs(rand::thread_rng().gen_range(min..min.saturating_mul(2)))
    }

    fn resource_url(&self, gvr: &GroupVersionResource) -> String {
        format!("{}{}/{}", self.server, gvr.group_version().api_path(), gvr.resource)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> SyncResult<Response> {
        let response = self.authorized(request).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::GONE => Err(SyncError::Expired(what.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Transient(format!("{what}: HTTP {status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn discover(&self, gvr: &GroupVersionResource) -> SyncResult<Option<ApiResource>> {
        let gv = gvr.group_version();
        let url = format!("{}{}", self.server, gv.api_path());
        let response = self
            .authorized(self.client.get(&url).timeout(REQUEST_TIMEOUT))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Transient(format!("discover {gv}: HTTP {}", response.status())));
        }
        let list: ApiResourceList = response.json().await?;
        Ok(list
            .resources
            .into_iter()
            .find(|r| r.name == gvr.resource)
            .map(|r| ApiResource::new(gvr.clone(), r.kind, r.namespaced)))
    }

    async fn list(
        &self,
        gvr: &GroupVersionResource,
        limit: Option<usize>,
        continue_token: Option<&str>,
    ) -> SyncResult<ListPage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(token) = continue_token {
            query.push(("continue", token.to_string()));
        }
        let request = self
            .client
            .get(self.resource_url(gvr))
            .query(&query)
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(request, &format!("list {gvr}")).await?;
        let list: ObjectListResponse = response.json().await?;

        // List items carry no type fields; restore them from the list kind.
        let api_version = gvr.group_version().api_version();
        let item_kind = list.kind.strip_suffix("List").unwrap_or_default().to_string();
        let items = list
            .items
            .into_iter()
            .map(|mut item| {
                if let Some(map) = item.as_object_mut() {
                    map.entry("apiVersion")
                        .or_insert_with(|| Value::String(api_version.clone()));
                    if !item_kind.is_empty() {
                        map.entry("kind").or_insert_with(|| Value::String(item_kind.clone()));
                    }
                }
                item
            })
            .collect();

        Ok(ListPage {
            items,
            resource_version: ResourceVersion::new(list.metadata.resource_version),
            continue_token: list.metadata.continue_token.filter(|t| !t.is_empty()),
        })
    }

    async fn watch(&self, gvr: &GroupVersionResource, resource_version: &ResourceVersion) -> SyncResult<WatchStream> {
        let server_timeout = self.watch_timeout();
        // The server should close first; the client deadline only catches dead peers.
        let deadline = server_timeout + self.min_watch_timeout / 10;
        let request = self
            .client
            .get(self.resource_url(gvr))
            .query(&[
                ("watch", "true"),
                ("allowWatchBookmarks", "true"),
                ("resourceVersion", resource_version.as_str()),
            ])
            .query(&[("timeoutSeconds", server_timeout.as_secs())])
            .timeout(deadline);
        let response = self.send(request, &format!("watch {gvr}")).await?;
        debug!(resource = %gvr, %resource_version, timeout_secs = server_timeout.as_secs(), "Watch established");
        let body = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        Ok(ndjson_events(body, MAX_WATCH_LINE))
    }
}

/// Splits a chunked response body into watch events, one JSON document
/// per line. The stream ends after the first error, including a line longer
/// than `max_line`.
fn ndjson_events(body: BoxStream<'static, reqwest::Result<Vec<u8>>>, max_line: usize) -> WatchStream {
    stream::unfold((body, Vec::new(), false), move |(mut body, mut buf, done)| async move {
        if done {
            return None;
        }
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let event = parse_watch_line(&line);
                let failed = event.is_err();
                return Some((event, (body, buf, failed)));
            }
            if buf.len() > max_line {
                let err = SyncError::Decode(format!("watch event exceeds {max_line} bytes"));
                return Some((Err(err), (body, Vec::new(), true)));
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Some((Err(SyncError::Transient(e.to_string())), (body, buf, true)));
                }
                None => {
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    let line = std::mem::take(&mut buf);
                    return Some((parse_watch_line(&line), (body, buf, true)));
                }
            }
        }
    })
    .boxed()
}

/// Decodes one watch line.
pub(crate) fn parse_watch_line(line: &[u8]) -> SyncResult<WatchEvent> {
    let raw: RawWatchEvent = serde_json::from_slice(line)?;
    match raw.event_type.as_str() {
        "ADDED" => Ok(WatchEvent::Added(raw.object)),
        "MODIFIED" => Ok(WatchEvent::Modified(raw.object)),
        "DELETED" => Ok(WatchEvent::Deleted(raw.object)),
        "BOOKMARK" => {
            let rv = raw
                .object
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(WatchEvent::Bookmark(ResourceVersion::from(rv)))
        }
        "ERROR" => {
            let code = raw.object.get("code").and_then(Value::as_u64).unwrap_or_default();
            let message = raw
                .object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("watch error")
                .to_string();
            if code == 410 {
                Err(SyncError::Expired(message))
            } else {
                Err(SyncError::Transient(format!("watch error {code}: {message}")))
            }
        }
        other => Err(SyncError::Decode(format!("unknown watch event type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_events() {
        let event = parse_watch_line(br#"{"type":"ADDED","object":{"metadata":{"name":"a"}}}"#).unwrap();
        assert!(matches!(event, WatchEvent::Added(o) if o["metadata"]["name"] == "a"));
    }

    #[test]
    fn bookmark_carries_resource_version() {
        let event =
            parse_watch_line(br#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"42"}}}"#).unwrap();
        assert_eq!(event, WatchEvent::Bookmark(ResourceVersion::from("42")));
    }

    #[test]
    fn gone_error_is_expired() {
        let err = parse_watch_line(br#"{"type":"ERROR","object":{"code":410,"message":"too old"}}"#).unwrap_err();
        assert!(matches!(err, SyncError::Expired(_)));
    }

    #[tokio::test]
    async fn splits_chunks_on_newlines() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(br#"{"type":"ADDED","object":{"metadata":{"name":"a"}}}"#.to_vec()),
            Ok(b"\n{\"type\":\"DELETED\",\"obj".to_vec()),
            Ok(b"ect\":{\"metadata\":{\"name\":\"a\"}}}\n\n".to_vec()),
        ];
        let events: Vec<_> = ndjson_events(stream::iter(chunks).boxed(), MAX_WATCH_LINE).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(WatchEvent::Added(_))));
        assert!(matches!(events[1], Ok(WatchEvent::Deleted(_))));
    }

    #[tokio::test]
    async fn oversized_line_ends_stream() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"{\"type\":\"ADDED\",\"object\":{}}\n".to_vec()),
            Ok(vec![b'x'; 40]),
            Ok(vec![b'x'; 40]),
            Ok(b"\n".to_vec()),
        ];
        let events: Vec<_> = ndjson_events(stream::iter(chunks).boxed(), 64).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(WatchEvent::Added(_))));
        assert!(matches!(events[1], Err(SyncError::Decode(_))));
    }

    #[test]
    fn watch_timeout_is_randomized_within_bounds() {
        let client = HttpClusterClient::new("https://c1", None)
            .unwrap()
            .with_min_watch_timeout(Duration::from_secs(10));
        for _ in 0..50 {
            let timeout = client.watch_timeout();
            assert!(timeout >= Duration::from_secs(10) && timeout < Duration::from_secs(20), "{timeout:?}");
        }
    }
}
