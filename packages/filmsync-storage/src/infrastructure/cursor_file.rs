//! JSON file cursor store
//!
//! One JSON object per file, `{ "<state_field>": <watermark>, ... }`.
//! Writes go to a sibling temp file that is then renamed over the original,
//! so a crash mid-write leaves the previous state intact.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{CursorStore, Watermark};
use crate::Result;

#[derive(Debug, Clone)]
pub struct JsonFileCursorStore {
    path: PathBuf,
}

impl JsonFileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole file contents; a missing or empty file reads as `{}`
    async fn read_all(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, state: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn get(&self, field: &str) -> Result<Option<Watermark>> {
        let state = self.read_all().await?;
        Ok(state.get(field).and_then(Watermark::from_value))
    }

    async fn set(&self, field: &str, value: &Watermark) -> Result<()> {
        let mut state = self.read_all().await?;
        state.insert(field.to_string(), serde_json::to_value(value)?);
        self.write_all(&state).await?;
        debug!("Saved cursor {}={} to {}", field, value, self.path.display());
        Ok(())
    }
}
