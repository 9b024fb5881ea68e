//! Re-materialization: root id set → wide joined rows

use filmsync_storage::{EntityId, QueryParam, RawRow, RelationalSource};
use std::sync::Arc;
use tracing::debug;

use crate::config::MergerSpec;
use crate::enricher::IDS_PLACEHOLDER;
use crate::error::Result;
use crate::template::SqlTemplate;

pub struct Merger {
    spec: MergerSpec,
    template: SqlTemplate,
    source: Arc<dyn RelationalSource>,
}

impl Merger {
    pub fn new(spec: MergerSpec, source: Arc<dyn RelationalSource>) -> Self {
        let template = SqlTemplate::new(spec.sql.as_str());
        Self {
            spec,
            template,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &MergerSpec {
        &self.spec
    }

    /// Fetch one row per (root, sub-entity) pair for `ids`
    pub async fn merge(&self, ids: &[EntityId]) -> Result<Vec<RawRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = self
            .template
            .render(&[(IDS_PLACEHOLDER, QueryParam::TextArray(ids.to_vec()))])?;
        let rows = self.source.fetch(&query.sql, &query.params).await?;
        debug!("Merger '{}' fetched {} rows for {} ids", self.spec.name, rows.len(), ids.len());
        Ok(rows)
    }
}
