//! In-process stand-ins for PostgreSQL and Elasticsearch

use async_trait::async_trait;
use filmsync_orchestration::ProducerSpec;
use filmsync_storage::{
    BulkItemFailure, BulkOperation, BulkResponse, CursorStore, DocumentIndex, DocumentLookup,
    InMemoryCursorStore, QueryParam, RawRow, RelationalSource, Result, StorageError, Watermark,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// Relational source
// ═══════════════════════════════════════════════════════════════════════════

type Handler = Box<dyn Fn(&[QueryParam]) -> Result<Vec<RawRow>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub marker: String,
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl RecordedQuery {
    /// Ids bound as the text array of an enricher/merger query
    pub fn ids(&self) -> Vec<String> {
        self.params
            .iter()
            .find_map(|p| p.as_text_array())
            .map(|ids| ids.to_vec())
            .unwrap_or_default()
    }
}

/// Routes each query to a handler by its `/* marker */` comment and records it
#[derive(Default)]
pub struct ScriptedSource {
    routes: Vec<(String, Handler)>,
    calls: Mutex<Vec<RecordedQuery>>,
    failures: Mutex<Vec<(String, StorageError)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        marker: &str,
        handler: impl Fn(&[QueryParam]) -> Result<Vec<RawRow>> + Send + Sync + 'static,
    ) -> Self {
        self.routes.push((marker.to_string(), Box::new(handler)));
        self
    }

    /// Make the next query for `marker` fail with `err`
    pub fn fail_next(&self, marker: &str, err: StorageError) {
        self.failures.lock().push((marker.to_string(), err));
    }

    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, marker: &str) -> Vec<RecordedQuery> {
        self.calls
            .lock()
            .iter()
            .filter(|q| q.marker == marker)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl RelationalSource for ScriptedSource {
    async fn fetch(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<RawRow>> {
        let (marker, handler) = self
            .routes
            .iter()
            .find(|(marker, _)| sql.contains(&format!("/* {} */", marker)))
            .ok_or_else(|| StorageError::database(format!("no scripted route for: {}", sql)))?;

        self.calls.lock().push(RecordedQuery {
            marker: marker.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        {
            let mut failures = self.failures.lock();
            if let Some(pos) = failures.iter().position(|(m, _)| m == marker) {
                return Err(failures.remove(pos).1);
            }
        }

        handler(params)
    }
}

/// A table of `(id, modified)` rows answering producer queries
///
/// Emulates `WHERE modified > $1 ORDER BY modified LIMIT $2`, or just
/// `LIMIT $1` when the filter line was stripped.
#[derive(Clone, Default)]
pub struct ChangeLog {
    rows: Arc<Mutex<Vec<(String, i64)>>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: &[(&str, i64)]) -> Self {
        let log = Self::new();
        for (id, modified) in rows {
            log.push(id, *modified);
        }
        log
    }

    pub fn push(&self, id: &str, modified: i64) {
        self.rows.lock().push((id.to_string(), modified));
    }

    pub fn handler(&self) -> impl Fn(&[QueryParam]) -> Result<Vec<RawRow>> + Send + Sync + 'static {
        let rows = self.rows.clone();
        move |params| {
            let (since, limit) = match params {
                [watermark, limit] => (watermark.as_int(), limit.as_int()),
                [limit] => (None, limit.as_int()),
                other => {
                    return Err(StorageError::database(format!(
                        "unexpected producer params: {:?}",
                        other
                    )))
                }
            };
            let limit = limit.unwrap_or(i64::MAX) as usize;

            let mut matching: Vec<(String, i64)> = rows
                .lock()
                .iter()
                .filter(|(_, modified)| since.map_or(true, |s| *modified > s))
                .cloned()
                .collect();
            matching.sort_by_key(|(_, modified)| *modified);

            Ok(matching
                .into_iter()
                .take(limit)
                .map(|(id, modified)| {
                    RawRow::from_pairs(vec![("id", Value::from(id)), ("modified", Value::from(modified))])
                })
                .collect())
        }
    }
}

/// Enricher handler: each bound id maps to its listed dependents
pub fn mapping_handler(
    mapping: Vec<(&str, Vec<&str>)>,
) -> impl Fn(&[QueryParam]) -> Result<Vec<RawRow>> + Send + Sync + 'static {
    let mapping: HashMap<String, Vec<String>> = mapping
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
        .collect();
    move |params| {
        let ids = params.first().and_then(|p| p.as_text_array()).unwrap_or(&[]);
        Ok(ids
            .iter()
            .flat_map(|id| mapping.get(id).cloned().unwrap_or_default())
            .map(|dep| RawRow::from_pairs(vec![("id", Value::from(dep))]))
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Document index
// ═══════════════════════════════════════════════════════════════════════════

/// Document index kept in memory, with failure injection
#[derive(Default)]
pub struct InMemoryIndex {
    schemas: Mutex<BTreeMap<String, Value>>,
    docs: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    bulk_sizes: Mutex<Vec<usize>>,
    bulk_attempts: AtomicU32,
    create_calls: AtomicU32,
    transient_failures: AtomicU32,
    permanent_failure: AtomicBool,
    rejected_ids: Mutex<HashSet<String>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` bulk calls fail with a connection error
    pub fn fail_transiently(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Every bulk call fails with a non-retryable error
    pub fn fail_permanently(&self, enabled: bool) {
        self.permanent_failure.store(enabled, Ordering::SeqCst);
    }

    /// Documents with these ids are refused inside successful bulk responses
    pub fn reject_ids(&self, ids: &[&str]) {
        self.rejected_ids
            .lock()
            .extend(ids.iter().map(|s| s.to_string()));
    }

    /// Sizes of the bulk calls that reached the index
    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().clone()
    }

    pub fn bulk_attempts(&self) -> u32 {
        self.bulk_attempts.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn schema(&self, index: &str) -> Option<Value> {
        self.schemas.lock().get(index).cloned()
    }

    pub fn doc_ids(&self, index: &str) -> Vec<String> {
        self.docs
            .lock()
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, index: &str) -> BTreeMap<String, Value> {
        self.docs.lock().get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DocumentIndex for InMemoryIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.schemas.lock().contains_key(index))
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.schemas.lock().insert(index.to_string(), schema.clone());
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse> {
        self.bulk_attempts.fetch_add(1, Ordering::SeqCst);

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::transport("connection refused"));
        }
        if self.permanent_failure.load(Ordering::SeqCst) {
            return Err(StorageError::index("bulk failed with HTTP 400: illegal_argument_exception"));
        }

        let rejected = self.rejected_ids.lock().clone();
        let mut docs = self.docs.lock();
        let mut failures = Vec::new();
        for op in operations {
            if rejected.contains(&op.id) {
                failures.push(BulkItemFailure {
                    id: op.id.clone(),
                    status: 400,
                    reason: "mapper_parsing_exception: failed to parse".to_string(),
                });
                continue;
            }
            docs.entry(op.index.clone())
                .or_default()
                .insert(op.id.clone(), op.document.clone());
        }
        self.bulk_sizes.lock().push(operations.len());

        Ok(BulkResponse {
            took_ms: 1,
            items: operations.len(),
            failures,
        })
    }
}

#[async_trait]
impl DocumentLookup for InMemoryIndex {
    async fn get_by_id(&self, index: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .docs
            .lock()
            .get(index)
            .and_then(|docs| docs.get(id).cloned()))
    }

    /// Supports `{"term": {field: value}}`; anything else matches all
    async fn get_by_query(&self, index: &str, query: &Value, size: usize) -> Result<Vec<Value>> {
        let term = query
            .get("term")
            .and_then(Value::as_object)
            .and_then(|t| t.iter().next());
        Ok(self
            .snapshot(index)
            .into_values()
            .filter(|doc| term.map_or(true, |(field, value)| doc.get(field) == Some(value)))
            .take(size)
            .collect())
    }

    async fn get_list(&self, index: &str, from: usize, size: usize) -> Result<Vec<Value>> {
        Ok(self
            .snapshot(index)
            .into_values()
            .skip(from)
            .take(size)
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Cursor stores
// ═══════════════════════════════════════════════════════════════════════════

/// One in-memory cursor store per producer name
#[derive(Clone, Default)]
pub struct CursorBank {
    stores: Arc<Mutex<HashMap<String, InMemoryCursorStore>>>,
}

impl CursorBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, producer: &str) -> InMemoryCursorStore {
        self.stores
            .lock()
            .entry(producer.to_string())
            .or_default()
            .clone()
    }

    pub fn watermark(&self, producer: &str, field: &str) -> Option<Watermark> {
        self.store(producer).snapshot().get(field).cloned()
    }

    pub fn factory(
        &self,
    ) -> impl Fn(&ProducerSpec) -> filmsync_orchestration::Result<Arc<dyn CursorStore>> {
        let bank = self.clone();
        move |spec| Ok(Arc::new(bank.store(&spec.name)) as Arc<dyn CursorStore>)
    }
}
