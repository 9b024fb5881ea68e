//! Infrastructure layer - storage adapters
//!
//! - `postgres`: relational source (sqlx)
//! - `elasticsearch`: document index over REST (reqwest)
//! - `cursor_file` / `sqlite` / `memory`: cursor stores

pub mod cursor_file;
pub mod elasticsearch;
pub mod memory;
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cursor_file::JsonFileCursorStore;
pub use elasticsearch::ElasticsearchIndex;
pub use memory::InMemoryCursorStore;
pub use postgres::PostgresSource;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;
