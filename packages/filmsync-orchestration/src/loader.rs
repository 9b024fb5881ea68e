//! Bulk delivery into the document index
//!
//! `ensure_schema` and every bulk call run under the retry policy. Documents
//! the index refuses inside a successful bulk response are handled by the
//! loader's `DocumentErrorPolicy`.

use filmsync_storage::{BulkOperation, DocumentIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backoff::{retry_with_backoff, RetryPolicy};
use crate::error::{OrchestratorError, Result};
use crate::transform::DomainRecord;

/// What to do with documents rejected inside a bulk response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentErrorPolicy {
    /// Abort the pass; no watermark is committed
    #[default]
    Fail,
    /// Log the rejected ids and keep going
    Skip,
}

/// Counts for one `load` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub documents: usize,
    pub batches: usize,
    pub rejected: usize,
}

impl LoadReport {
    pub fn absorb(&mut self, other: LoadReport) {
        self.documents += other.documents;
        self.batches += other.batches;
        self.rejected += other.rejected;
    }
}

pub struct Loader {
    index: Arc<dyn DocumentIndex>,
    bulk_size: usize,
    retry: RetryPolicy,
}

impl Loader {
    pub fn new(index: Arc<dyn DocumentIndex>, bulk_size: usize, retry: RetryPolicy) -> Self {
        Self {
            index,
            bulk_size: bulk_size.max(1),
            retry,
        }
    }

    pub fn bulk_size(&self) -> usize {
        self.bulk_size
    }

    /// Create `index_name` with `schema` unless it already exists
    ///
    /// Returns `true` when the index was created by this call.
    pub async fn ensure_schema(&self, index_name: &str, schema: &Value) -> Result<bool> {
        let operation = format!("ensure index '{}'", index_name);
        let created = retry_with_backoff(&self.retry, &operation, || async {
            if self.index.index_exists(index_name).await? {
                return Ok(false);
            }
            self.index.create_index(index_name, schema).await?;
            Ok::<_, OrchestratorError>(true)
        })
        .await?;

        if created {
            info!("Created index '{}'", index_name);
        } else {
            debug!("Index '{}' already exists", index_name);
        }
        Ok(created)
    }

    /// Upsert `records` into `index_name`, `bulk_size` documents per request
    pub async fn load(
        &self,
        records: &[DomainRecord],
        index_name: &str,
        on_document_error: DocumentErrorPolicy,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let operation = format!("bulk load into '{}'", index_name);

        for chunk in records.chunks(self.bulk_size) {
            let operations = chunk
                .iter()
                .map(|record| {
                    Ok(BulkOperation::index(
                        index_name,
                        record.id(),
                        record.to_document()?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            let response = retry_with_backoff(&self.retry, &operation, || async {
                self.index
                    .bulk(&operations)
                    .await
                    .map_err(OrchestratorError::from)
            })
            .await?;

            report.documents += response.succeeded();
            report.batches += 1;

            if response.has_failures() {
                let first = &response.failures[0];
                match on_document_error {
                    DocumentErrorPolicy::Fail => {
                        return Err(OrchestratorError::BulkRejected {
                            index: index_name.to_string(),
                            failed: response.failures.len(),
                            first_error: format!("{}: {}", first.id, first.reason),
                        });
                    }
                    DocumentErrorPolicy::Skip => {
                        let ids: Vec<&str> = response.failures.iter().map(|f| f.id.as_str()).collect();
                        warn!(
                            "Index '{}' rejected {} documents, skipping: {:?} (first: {})",
                            index_name,
                            ids.len(),
                            ids,
                            first.reason
                        );
                        report.rejected += response.failures.len();
                    }
                }
            }

            debug!(
                "Bulk batch of {} into '{}' took {}ms",
                operations.len(),
                index_name,
                response.took_ms
            );
        }

        Ok(report)
    }
}
