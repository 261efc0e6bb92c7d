use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{Record, RowRef, StoredRecord};

use super::{RecordStore, Sheet, StoreError};

/// Volatile record store. Used by tests and as a scratch backend.
pub struct InMemoryStore {
    sheet: RwLock<Sheet>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sheet: RwLock::new(Sheet::new()),
        }
    }

    /// Start from an existing header row, in any order, possibly with
    /// columns the engine never reads.
    pub fn with_headers(headers: &[&str]) -> Self {
        Self {
            sheet: RwLock::new(Sheet::with_headers(headers.iter().copied())),
        }
    }

    pub async fn row_count(&self) -> usize {
        self.sheet.read().await.row_count()
    }

    pub async fn headers(&self) -> Vec<String> {
        self.sheet.read().await.headers().to_vec()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn scan_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.sheet.read().await.records())
    }

    async fn append(&self, record: Record) -> Result<RowRef, StoreError> {
        let mut sheet = self.sheet.write().await;
        for event in sheet.plan_append(&record) {
            sheet.apply(&event);
        }
        Ok(RowRef(sheet.row_count() - 1))
    }

    async fn update_fields(&self, row: RowRef, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut sheet = self.sheet.write().await;
        for event in sheet.plan_update(row, fields)? {
            sheet.apply(&event);
        }
        Ok(())
    }
}
