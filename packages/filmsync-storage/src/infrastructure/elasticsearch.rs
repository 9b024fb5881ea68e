//! Elasticsearch adapter over the REST API
//!
//! - `HEAD /{index}` / `PUT /{index}` for schema management
//! - `POST /_bulk` with an NDJSON body of `index` actions (create-or-replace)
//! - `GET /{index}/_doc/{id}` and `POST /{index}/_search` for lookups

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{BulkItemFailure, BulkOperation, BulkResponse, DocumentIndex, DocumentLookup};
use crate::error::is_retryable_status;
use crate::{ErrorKind, Result, StorageError};

pub struct ElasticsearchIndex {
    client: Client,
    base: Url,
}

impl ElasticsearchIndex {
    /// Build a client for `host` (e.g. `http://localhost:9200`)
    pub fn new(host: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::config(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(client, host)
    }

    pub fn with_client(client: Client, host: &str) -> Result<Self> {
        let base = Url::parse(host)
            .map_err(|e| StorageError::config(format!("Invalid index host '{}': {}", host, e)))?;
        if base.cannot_be_a_base() {
            return Err(StorageError::config(format!(
                "Invalid index host '{}': not a base URL",
                host
            )));
        }
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::config(format!("Invalid index host '{}'", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn search(&self, index: &str, body: Value) -> Result<Vec<Value>> {
        let url = self.endpoint(&[index, "_search"])?;
        let response = self.client.post(url).json(&body).send().await?;
        let response = ensure_success(response, "search").await?;
        let body: Value = response.json().await?;
        Ok(hit_sources(&body))
    }
}

/// Turn a non-2xx response into a `StorageError`, transient for overload statuses
async fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, context, &body))
}

fn status_error(status: StatusCode, context: &str, body: &str) -> StorageError {
    let transient = is_retryable_status(status.as_u16()) || status.is_server_error();
    let kind = if transient {
        ErrorKind::Transport
    } else {
        ErrorKind::Index
    };
    StorageError::new(
        kind,
        format!("{} failed with HTTP {}: {}", context, status.as_u16(), body),
    )
    .with_transient(transient)
}

/// Serialize operations into the `_bulk` NDJSON body (trailing newline included)
pub fn bulk_body(operations: &[BulkOperation]) -> Result<String> {
    let mut body = String::new();
    for op in operations {
        let action = json!({ "index": { "_index": op.index, "_id": op.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&op.document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Extract per-document outcomes from a `_bulk` response body
pub fn parse_bulk_response(body: &Value) -> Result<BulkResponse> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StorageError::index("bulk response has no 'items' array"))?;

    let mut failures = Vec::new();
    for item in items {
        // Each item is a single-key object named after the action
        let Some(outcome) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };

        let status = outcome
            .get("status")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;
        let error = outcome.get("error");

        if error.is_some() || status >= 300 {
            let id = outcome
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let reason = error
                .map(|e| {
                    let kind = e.get("type").and_then(Value::as_str).unwrap_or("error");
                    let detail = e.get("reason").and_then(Value::as_str).unwrap_or("");
                    format!("{}: {}", kind, detail)
                })
                .unwrap_or_else(|| format!("HTTP {}", status));
            failures.push(BulkItemFailure { id, status, reason });
        }
    }

    Ok(BulkResponse {
        took_ms: body.get("took").and_then(Value::as_u64).unwrap_or(0),
        items: items.len(),
        failures,
    })
}

fn hit_sources(body: &Value) -> Vec<Value> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentIndex for ElasticsearchIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.endpoint(&[index])?;
        let response = self.client.head(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(status_error(status, "index exists check", "")),
        }
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<()> {
        let url = self.endpoint(&[index])?;
        let response = self.client.put(url).json(schema).send().await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            // Another writer created it between our check and create
            if body.contains("resource_already_exists_exception") {
                warn!("Index '{}' already exists", index);
                return Ok(());
            }
            return Err(status_error(StatusCode::BAD_REQUEST, "create index", &body));
        }

        ensure_success(response, "create index").await?;
        debug!("Created index '{}'", index);
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }

        let url = self.endpoint(&["_bulk"])?;
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(operations)?)
            .send()
            .await?;
        let response = ensure_success(response, "bulk").await?;
        let body: Value = response.json().await?;

        let parsed = parse_bulk_response(&body)?;
        debug!(
            "Bulk request: {} items, {} failed, took {}ms",
            parsed.items,
            parsed.failures.len(),
            parsed.took_ms
        );
        Ok(parsed)
    }
}

#[async_trait]
impl DocumentLookup for ElasticsearchIndex {
    async fn get_by_id(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&[index, "_doc", id])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response, "get document").await?;
        let body: Value = response.json().await?;
        Ok(body.get("_source").cloned())
    }

    async fn get_by_query(&self, index: &str, query: &Value, size: usize) -> Result<Vec<Value>> {
        self.search(index, json!({ "query": query, "size": size }))
            .await
    }

    async fn get_list(&self, index: &str, from: usize, size: usize) -> Result<Vec<Value>> {
        self.search(
            index,
            json!({ "query": { "match_all": {} }, "from": from, "size": size }),
        )
        .await
    }
}
