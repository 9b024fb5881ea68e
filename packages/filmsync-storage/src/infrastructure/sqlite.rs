//! SQLite cursor store
//!
//! Alternative to the JSON file store when several producers should share
//! one durable file with transactional writes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::domain::{CursorStore, Watermark};
use crate::{Result, StorageError};

#[derive(Clone)]
pub struct SqliteCursorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCursorStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cursor_state (
                field TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, field: &str) -> Result<Option<Watermark>> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM cursor_state WHERE field = ?1",
                params![field],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            None => Ok(None),
            Some(text) => {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                Watermark::from_value(&value).map(Some).ok_or_else(|| {
                    StorageError::serialization(format!(
                        "Stored cursor '{}' is not a watermark: {}",
                        field, text
                    ))
                })
            }
        }
    }

    async fn set(&self, field: &str, value: &Watermark) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cursor_state (field, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(field) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![field, text, now],
        )?;
        Ok(())
    }
}
