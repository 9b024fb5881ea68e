//! Run controller: wires the configured topology and executes passes
//!
//! One pass:
//! 1. ensure every loader's index exists
//! 2. producers restart from their committed watermark and drain
//! 3. enrichers map each page of their producer
//! 4. each merger unions its origins into a sorted id set and walks it in
//!    chunks of `elastic.bulk_size`: merge → transform → load, per consuming loader
//! 5. producers commit their watermarks
//!
//! Any error aborts the pass before step 5; the next pass redoes the work
//! from the last committed watermark.

use filmsync_storage::{CursorStore, DocumentIndex, EntityId, RelationalSource};
use futures::{pin_mut, TryStreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{EtlConfig, LoaderSpec, ProducerSpec};
use crate::enricher::Enricher;
use crate::error::{OrchestratorError, Result};
use crate::loader::{LoadReport, Loader};
use crate::merger::Merger;
use crate::pass::{PassState, PassStateMachine};
use crate::producer::Producer;
use crate::transform::transform;

/// Provenance of an id set consumed by a merger
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Producer(String),
    Enricher(String),
}

impl Origin {
    pub fn name(&self) -> &str {
        match self {
            Origin::Producer(name) | Origin::Enricher(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Distinct root ids after the union
    pub ids: usize,
    pub chunks: usize,
    pub rows: usize,
}

/// Counts for one pass, keyed by component name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub produced: BTreeMap<String, usize>,
    pub enriched: BTreeMap<String, usize>,
    pub merged: BTreeMap<String, MergeReport>,
    pub loaded: BTreeMap<String, LoadReport>,
    pub indices_created: Vec<String>,
    /// Producers whose watermark was written
    pub committed: Vec<String>,
    pub duration_ms: u64,
}

impl PassReport {
    pub fn documents_loaded(&self) -> usize {
        self.loaded.values().map(|l| l.documents).sum()
    }

    pub fn documents_rejected(&self) -> usize {
        self.loaded.values().map(|l| l.rejected).sum()
    }

    pub fn ids_produced(&self) -> usize {
        self.produced.values().sum()
    }
}

struct LoaderTarget {
    spec: LoaderSpec,
    schema: Value,
}

struct MergePlan {
    merger: Merger,
    origins: Vec<Origin>,
    /// Indexes into `RunController::targets`
    targets: Vec<usize>,
}

pub struct RunController {
    producers: Vec<Producer>,
    enrichers: Vec<Enricher>,
    plans: Vec<MergePlan>,
    targets: Vec<LoaderTarget>,
    loader: Loader,
    state: PassStateMachine,
}

fn load_schema(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(json!({}));
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::config(format!("Cannot read index schema {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        OrchestratorError::config(format!("Invalid index schema {}: {}", path.display(), e))
    })
}

impl RunController {
    /// Build every component once; connections are shared, never global
    ///
    /// `cursor_for` supplies the cursor store of each producer.
    pub async fn new<F>(
        config: EtlConfig,
        source: Arc<dyn RelationalSource>,
        index: Arc<dyn DocumentIndex>,
        cursor_for: F,
    ) -> Result<Self>
    where
        F: Fn(&ProducerSpec) -> Result<Arc<dyn CursorStore>>,
    {
        config.validate()?;

        let mut producers = Vec::with_capacity(config.producers.len());
        for spec in &config.producers {
            let cursor = cursor_for(spec)?;
            producers.push(Producer::new(spec.clone(), source.clone(), cursor).await?);
        }

        let enrichers: Vec<Enricher> = config
            .enrichers
            .iter()
            .map(|spec| Enricher::new(spec.clone(), source.clone()))
            .collect();

        let targets = config
            .loaders
            .iter()
            .map(|spec| {
                Ok(LoaderTarget {
                    schema: load_schema(spec.schema.as_deref())?,
                    spec: spec.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut plans = Vec::with_capacity(config.mergers.len());
        for spec in &config.mergers {
            let consumers: Vec<usize> = targets
                .iter()
                .enumerate()
                .filter(|(_, t)| t.spec.merger == spec.name)
                .map(|(i, _)| i)
                .collect();
            if consumers.is_empty() {
                warn!("Merger '{}' has no loader and will not run", spec.name);
                continue;
            }

            let origins = spec
                .sources
                .iter()
                .map(|name| {
                    if producers.iter().any(|p| p.name() == name) {
                        Ok(Origin::Producer(name.clone()))
                    } else if enrichers.iter().any(|e| e.name() == name) {
                        Ok(Origin::Enricher(name.clone()))
                    } else {
                        Err(OrchestratorError::config(format!(
                            "merger '{}' uses unknown producer or enricher '{}'",
                            spec.name, name
                        )))
                    }
                })
                .collect::<Result<Vec<_>>>()?;

            plans.push(MergePlan {
                merger: Merger::new(spec.clone(), source.clone()),
                origins,
                targets: consumers,
            });
        }

        let loader = Loader::new(index, config.elastic.bulk_size, config.retry.clone());

        info!(
            "Controller ready: {} producers, {} enrichers, {} active mergers, {} loaders",
            producers.len(),
            enrichers.len(),
            plans.len(),
            targets.len()
        );

        Ok(Self {
            producers,
            enrichers,
            plans,
            targets,
            loader,
            state: PassStateMachine::new(),
        })
    }

    pub fn state(&self) -> PassState {
        self.state.state()
    }

    pub fn producers(&self) -> &[Producer] {
        &self.producers
    }

    pub fn passes_completed(&self) -> u64 {
        self.state.passes_completed()
    }

    /// Execute one synchronization pass
    pub async fn run_pass(&mut self) -> Result<PassReport> {
        self.state.begin()?;
        info!("Pass started");

        match self.execute().await {
            Ok(mut report) => {
                report.duration_ms = self.state.complete()?;
                info!(
                    "Pass completed in {}ms - {} ids produced, {} documents loaded, {} rejected, {} watermarks committed",
                    report.duration_ms,
                    report.ids_produced(),
                    report.documents_loaded(),
                    report.documents_rejected(),
                    report.committed.len()
                );
                Ok(report)
            }
            Err(e) => {
                let phase = self.state.state();
                let elapsed = self.state.fail().unwrap_or_default();
                error!(
                    "Pass failed during {} after {}ms ({}), no watermark committed: {}",
                    phase,
                    elapsed,
                    e.category(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<PassReport> {
        let mut report = PassReport::default();

        for target in &self.targets {
            if self
                .loader
                .ensure_schema(&target.spec.index, &target.schema)
                .await?
            {
                report.indices_created.push(target.spec.index.clone());
            }
        }

        // Extracting
        let mut pages: HashMap<String, Vec<Vec<EntityId>>> = HashMap::new();
        for producer in &mut self.producers {
            producer.reload().await?;

            let mut produced = Vec::new();
            {
                let stream = producer.produce();
                pin_mut!(stream);
                while let Some(page) = stream.try_next().await? {
                    produced.push(page);
                }
            }

            let total: usize = produced.iter().map(Vec::len).sum();
            info!(
                "Producer '{}' produced {} ids in {} pages",
                producer.name(),
                total,
                produced.len()
            );
            report.produced.insert(producer.name().to_string(), total);
            pages.insert(producer.name().to_string(), produced);
        }

        // Enriching
        self.state.transition(PassState::Enriching)?;
        let mut enriched: HashMap<String, BTreeSet<EntityId>> = HashMap::new();
        for enricher in &self.enrichers {
            let mut ids = BTreeSet::new();
            for page in pages.get(enricher.source_name()).into_iter().flatten() {
                ids.extend(enricher.enrich(page).await?);
            }
            info!("Enricher '{}' found {} dependent ids", enricher.name(), ids.len());
            report.enriched.insert(enricher.name().to_string(), ids.len());
            enriched.insert(enricher.name().to_string(), ids);
        }

        // Merging / Loading
        self.state.transition(PassState::Merging)?;
        for target in &self.targets {
            report.loaded.insert(target.spec.name.clone(), LoadReport::default());
        }

        let chunk_size = self.loader.bulk_size();
        for plan in &self.plans {
            let mut ids: BTreeSet<EntityId> = BTreeSet::new();
            for origin in &plan.origins {
                match origin {
                    Origin::Producer(name) => {
                        ids.extend(pages.get(name).into_iter().flatten().flatten().cloned())
                    }
                    Origin::Enricher(name) => {
                        ids.extend(enriched.get(name).into_iter().flatten().cloned())
                    }
                }
            }

            if ids.is_empty() {
                debug!("Merger '{}': nothing changed", plan.merger.name());
                continue;
            }

            let ids: Vec<EntityId> = ids.into_iter().collect();
            let mut merged = MergeReport {
                ids: ids.len(),
                ..Default::default()
            };

            for chunk in ids.chunks(chunk_size) {
                if self.state.state() == PassState::Loading {
                    self.state.transition(PassState::Merging)?;
                }
                let rows = plan.merger.merge(chunk).await?;
                merged.chunks += 1;
                merged.rows += rows.len();

                self.state.transition(PassState::Loading)?;
                for &t in &plan.targets {
                    let target = &self.targets[t];
                    let records = transform(target.spec.kind, &rows)?;
                    let loaded = self
                        .loader
                        .load(&records, &target.spec.index, target.spec.on_document_error)
                        .await?;
                    if let Some(total) = report.loaded.get_mut(&target.spec.name) {
                        total.absorb(loaded);
                    }
                }
            }

            info!(
                "Merger '{}' re-materialized {} ids ({} rows, {} chunks)",
                plan.merger.name(),
                merged.ids,
                merged.rows,
                merged.chunks
            );
            report.merged.insert(plan.merger.name().to_string(), merged);
        }

        // Committing
        self.state.transition(PassState::Committing)?;
        for producer in &mut self.producers {
            if producer.save_state().await? {
                report.committed.push(producer.name().to_string());
            }
        }

        Ok(report)
    }
}
