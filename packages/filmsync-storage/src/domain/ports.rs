//! Storage Ports (Trait Interfaces)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Relational source: PostgreSQL (production), scripted fakes (tests)
//! - Document index: Elasticsearch (production), in-memory (tests)
//! - Cursor store: JSON file, SQLite, in-memory
//!
//! Connections are constructed once at startup and injected as
//! `Arc<dyn Port>` into every component; nothing here is global.

use async_trait::async_trait;
use serde_json::Value;

use super::models::{BulkOperation, BulkResponse, QueryParam, RawRow, Watermark};
use crate::Result;

/// Parameterized relational queries
#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Execute `sql` with positional parameters (`$1`, `$2`, ...) and return every row
    async fn fetch(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<RawRow>>;
}

/// Durable key → watermark persistence
///
/// Whole-value semantics: `set` replaces the stored value for `field`.
/// A single pipeline instance is the only writer of its cursor file.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Stored watermark for `field`, `None` when nothing was ever committed
    async fn get(&self, field: &str) -> Result<Option<Watermark>>;

    /// Persist `value` for `field`
    async fn set(&self, field: &str, value: &Watermark) -> Result<()>;
}

/// Write side of the search index
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create `index` with an opaque mapping/settings document
    async fn create_index(&self, index: &str, schema: &Value) -> Result<()>;

    /// Submit one bulk request; every operation is a create-or-replace by id
    ///
    /// Transport failures are returned as `Err`; documents refused by the
    /// index are reported in `BulkResponse::failures`.
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse>;
}

/// Read side of the search index (the capability set the query API relies on)
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// Source document by id, `None` when absent
    async fn get_by_id(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Source documents matching a backend query body
    async fn get_by_query(&self, index: &str, query: &Value, size: usize) -> Result<Vec<Value>>;

    /// A page of source documents in index order
    async fn get_list(&self, index: &str, from: usize, size: usize) -> Result<Vec<Value>>;
}
