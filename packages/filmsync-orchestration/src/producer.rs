//! Incremental extraction over a monotonic state column
//!
//! A producer pages through rows whose state column is past its watermark.
//! The query must order rows ascending by that column; each page moves the
//! in-memory watermark to the page maximum. Nothing reaches the cursor store
//! until `save_state`, which the controller calls only after a fully
//! successful pass.

use filmsync_storage::{
    CursorStore, EntityId, JsonFileCursorStore, QueryParam, RelationalSource, Watermark,
};
use futures::stream::{self, Stream};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ProducerSpec;
use crate::error::{OrchestratorError, Result};
use crate::template::{RenderedQuery, SqlTemplate};

pub const WATERMARK_PLACEHOLDER: &str = "watermark";
pub const LIMIT_PLACEHOLDER: &str = "limit";

/// Pick a cursor backend by file extension: `.db`/`.sqlite` → SQLite, anything else → JSON
pub fn open_cursor_store(path: &Path) -> Result<Arc<dyn CursorStore>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => {
            Ok(Arc::new(filmsync_storage::SqliteCursorStore::open(path)?))
        }
        _ => Ok(Arc::new(JsonFileCursorStore::new(path))),
    }
}

/// First-pass query: the template without its watermark filter lines.
///
/// The `:watermark` predicate has to sit on a line of its own; otherwise
/// dropping it takes the rest of the query (or its `LIMIT`) along with it.
pub fn bootstrap_template(producer: &str, sql: &str) -> Result<SqlTemplate> {
    let bootstrap = SqlTemplate::new(sql).strip_filter(WATERMARK_PLACEHOLDER);
    if bootstrap.source().trim().is_empty() {
        return Err(OrchestratorError::config(format!(
            "producer '{}': nothing is left of the query once the :{} line is dropped",
            producer, WATERMARK_PLACEHOLDER
        )));
    }
    if !bootstrap.references(LIMIT_PLACEHOLDER) {
        return Err(OrchestratorError::config(format!(
            "producer '{}': :{} shares a line with :{}; the first pass would be unbounded",
            producer, LIMIT_PLACEHOLDER, WATERMARK_PLACEHOLDER
        )));
    }
    Ok(bootstrap)
}

pub struct Producer {
    spec: ProducerSpec,
    source: Arc<dyn RelationalSource>,
    cursor: Arc<dyn CursorStore>,
    template: SqlTemplate,
    bootstrap: SqlTemplate,
    committed: Option<Watermark>,
    watermark: Option<Watermark>,
}

impl Producer {
    /// Build a producer and read its committed watermark
    pub async fn new(
        spec: ProducerSpec,
        source: Arc<dyn RelationalSource>,
        cursor: Arc<dyn CursorStore>,
    ) -> Result<Self> {
        let template = SqlTemplate::new(spec.sql.as_str());
        let bootstrap = bootstrap_template(&spec.name, &spec.sql)?;
        let mut producer = Self {
            spec,
            source,
            cursor,
            template,
            bootstrap,
            committed: None,
            watermark: None,
        };
        producer.reload().await?;
        Ok(producer)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProducerSpec {
        &self.spec
    }

    /// In-memory watermark (advanced by pages of the current pass)
    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    /// Last watermark read from or written to the cursor store
    pub fn committed(&self) -> Option<&Watermark> {
        self.committed.as_ref()
    }

    /// Discard in-memory progress and restart from the stored watermark
    pub async fn reload(&mut self) -> Result<()> {
        self.committed = self.cursor.get(&self.spec.state_field).await?;
        self.watermark = self.committed.clone();
        debug!(
            "Producer '{}' starts from {}={}",
            self.spec.name,
            self.spec.state_field,
            self.watermark
                .as_ref()
                .map_or_else(|| "<none>".to_string(), |w| w.to_string())
        );
        Ok(())
    }

    /// Query for the next page; the filter line is dropped while no watermark exists
    pub fn query(&self) -> Result<RenderedQuery> {
        let limit = QueryParam::Int(self.spec.limit as i64);
        match &self.watermark {
            Some(watermark) => self.template.render(&[
                (WATERMARK_PLACEHOLDER, QueryParam::from(watermark)),
                (LIMIT_PLACEHOLDER, limit),
            ]),
            None => self.bootstrap.render(&[(LIMIT_PLACEHOLDER, limit)]),
        }
    }

    /// Fetch one page of ids, `None` once the producer is drained
    pub async fn next_page(&mut self) -> Result<Option<Vec<EntityId>>> {
        let query = self.query()?;
        let rows = self.source.fetch(&query.sql, &query.params).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut page_max: Option<Watermark> = None;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let value = row
                .get(&self.spec.state_field)
                .and_then(Watermark::from_value)
                .ok_or_else(|| OrchestratorError::MissingStateField {
                    producer: self.spec.name.clone(),
                    field: self.spec.state_field.clone(),
                })?;
            if page_max.as_ref().map_or(true, |max| value > *max) {
                page_max = Some(value);
            }
            ids.push(row.id_field(&self.spec.id_field)?);
        }

        // The next query would return the same rows again
        if let (Some(current), Some(max)) = (&self.watermark, &page_max) {
            if max <= current {
                return Err(OrchestratorError::StalledCursor {
                    producer: self.spec.name.clone(),
                });
            }
        }

        self.watermark = page_max;
        debug!(
            "Producer '{}' page: {} ids, watermark now {:?}",
            self.spec.name,
            ids.len(),
            self.watermark
        );
        Ok(Some(ids))
    }

    /// Lazy sequence of id pages until the producer is drained
    pub fn produce(&mut self) -> impl Stream<Item = Result<Vec<EntityId>>> + '_ {
        stream::try_unfold(self, |producer| async move {
            let page = producer.next_page().await?;
            Ok::<_, OrchestratorError>(page.map(|ids| (ids, producer)))
        })
    }

    /// Persist the in-memory watermark if it moved past the committed one
    ///
    /// Returns `true` when the cursor store was written.
    pub async fn save_state(&mut self) -> Result<bool> {
        let Some(watermark) = &self.watermark else {
            return Ok(false);
        };
        if self.committed.as_ref().map_or(false, |c| watermark <= c) {
            return Ok(false);
        }

        self.cursor.set(&self.spec.state_field, watermark).await?;
        info!(
            "Producer '{}' committed {}={}",
            self.spec.name, self.spec.state_field, watermark
        );
        self.committed = Some(watermark.clone());
        Ok(true)
    }
}
