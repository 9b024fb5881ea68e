//! Domain layer: models and ports
//!
//! # Domain Models
//!
//! - `Watermark`: last-seen state-column value of a producer
//! - `RawRow`: one wide joined row from the relational store
//! - `BulkOperation`: a create-or-replace write keyed by document id
//!
//! # Port Traits
//!
//! - `RelationalSource`, `CursorStore`, `DocumentIndex`, `DocumentLookup`
//!
//! # Examples
//!
//! ```rust,ignore
//! use filmsync_storage::domain::{CursorStore, RelationalSource, QueryParam};
//!
//! async fn example(db: &dyn RelationalSource, cursor: &dyn CursorStore) -> Result<()> {
//!     let since = cursor.get("modified").await?;
//!     let rows = db
//!         .fetch(
//!             "SELECT id, modified FROM content.person WHERE modified > $1 ORDER BY modified LIMIT $2",
//!             &[QueryParam::from(&since.unwrap()), QueryParam::Int(100)],
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod models;
pub mod ports;

pub use models::{
    BulkItemFailure, BulkOperation, BulkResponse, EntityId, QueryParam, RawRow, Watermark,
};
pub use ports::{CursorStore, DocumentIndex, DocumentLookup, RelationalSource};
