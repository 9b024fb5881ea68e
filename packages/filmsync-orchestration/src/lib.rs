/*
 * Filmsync Orchestration - relational → search index synchronization
 *
 * Architecture:
 * - Producers: watermark-driven incremental extraction
 * - Enrichers: change fan-out to dependent root entities
 * - Mergers: join re-fetch of root entities by id set
 * - Transformers: grouping of wide rows into nested documents
 * - Loader: schema bootstrap and chunked bulk upsert with backoff
 * - Run Controller: pass state machine, commit on full success only
 */

// Public modules
pub mod backoff;
pub mod config;
pub mod controller;
pub mod enricher;
pub mod error;
pub mod loader;
pub mod merger;
pub mod pass;
pub mod producer;
pub mod template;
pub mod transform;

// Re-exports
pub use backoff::{retry_with_backoff, RetryPolicy};
pub use config::{DatabaseConfig, ElasticConfig, EnricherSpec, EtlConfig, LoaderSpec, MergerSpec, ProducerSpec};
pub use controller::{MergeReport, Origin, PassReport, RunController};
pub use enricher::Enricher;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use loader::{DocumentErrorPolicy, LoadReport, Loader};
pub use merger::Merger;
pub use pass::{PassState, PassStateMachine};
pub use producer::{open_cursor_store, Producer};
pub use template::{RenderedQuery, SqlTemplate};
pub use transform::{
    transform, DomainRecord, FilmRecord, GenreRecord, GenreRef, PersonRecord, PersonRef, RecordKind,
};
