//! In-memory cursor store for tests and dry runs

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{CursorStore, Watermark};
use crate::Result;

/// Cloning shares the underlying map
#[derive(Debug, Clone, Default)]
pub struct InMemoryCursorStore {
    values: Arc<RwLock<HashMap<String, Watermark>>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pre-committed watermark
    pub fn with_value(field: impl Into<String>, value: Watermark) -> Self {
        let store = Self::new();
        store.values.write().insert(field.into(), value);
        store
    }

    pub fn snapshot(&self) -> HashMap<String, Watermark> {
        self.values.read().clone()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, field: &str) -> Result<Option<Watermark>> {
        Ok(self.values.read().get(field).cloned())
    }

    async fn set(&self, field: &str, value: &Watermark) -> Result<()> {
        self.values.write().insert(field.to_string(), value.clone());
        Ok(())
    }
}
