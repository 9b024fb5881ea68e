//! Change fan-out: changed ids of one entity → ids of dependent roots

use filmsync_storage::{EntityId, QueryParam, RelationalSource};
use std::sync::Arc;
use tracing::debug;

use crate::config::EnricherSpec;
use crate::error::Result;
use crate::template::SqlTemplate;

pub const IDS_PLACEHOLDER: &str = "ids";

pub struct Enricher {
    spec: EnricherSpec,
    template: SqlTemplate,
    source: Arc<dyn RelationalSource>,
}

impl Enricher {
    pub fn new(spec: EnricherSpec, source: Arc<dyn RelationalSource>) -> Self {
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

    /// Producer this enricher consumes
    pub fn source_name(&self) -> &str {
        &self.spec.source
    }

    /// Map a page of changed ids to dependent ids (may contain duplicates)
    pub async fn enrich(&self, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = self
            .template
            .render(&[(IDS_PLACEHOLDER, QueryParam::TextArray(ids.to_vec()))])?;
        let rows = self.source.fetch(&query.sql, &query.params).await?;

        let mapped = rows
            .iter()
            .map(|row| row.id_field(&self.spec.id_field))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("Enricher '{}' mapped {} ids to {}", self.spec.name, ids.len(), mapped.len());
        Ok(mapped)
    }
}
