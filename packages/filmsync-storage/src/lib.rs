//! filmsync-storage - ports and adapters for the search-index sync pipeline
//!
//! ## Core Principles
//!
//! 1. **Relational store is the source of truth**: the index is a denormalized projection
//! 2. **Idempotent writes**: every document write is a create-or-replace keyed by id
//! 3. **Explicit connections**: adapters are constructed once and injected, never global
//!
//! ## Usage
//!
//! ```rust,ignore
//! use filmsync_storage::{ElasticsearchIndex, JsonFileCursorStore, PostgresSource};
//!
//! let db = PostgresSource::connect("postgres://app@localhost/movies").await?;
//! let es = ElasticsearchIndex::new("http://localhost:9200")?;
//! let cursor = JsonFileCursorStore::new("state/film_work.json");
//!
//! let since = cursor.get("modified").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    BulkItemFailure, BulkOperation, BulkResponse, CursorStore, DocumentIndex, DocumentLookup,
    EntityId, QueryParam, RawRow, RelationalSource, Watermark,
};

pub use infrastructure::{
    ElasticsearchIndex, InMemoryCursorStore, JsonFileCursorStore, PostgresSource,
};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteCursorStore;
