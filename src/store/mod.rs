mod memory;
mod sheet;
mod wal_store;

pub use memory::InMemoryStore;
pub use sheet::{Sheet, SheetEvent};
pub use wal_store::WalStore;

use async_trait::async_trait;

use crate::model::{Record, RowRef, StoredRecord};

/// Tabular record store. Reads are full scans; writes are row appends or
/// cell updates within one row. Each write lands completely or not at all,
/// but no read-modify-write atomicity is offered: callers that
/// check-then-act must serialise themselves.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn scan_all(&self) -> Result<Vec<StoredRecord>, StoreError>;

    async fn append(&self, record: Record) -> Result<RowRef, StoreError>;

    /// Overwrite several cells of one row as a single write.
    async fn update_fields(&self, row: RowRef, fields: &[(&str, &str)]) -> Result<(), StoreError>;

    async fn update_field(&self, row: RowRef, field: &str, value: &str) -> Result<(), StoreError> {
        self.update_fields(row, &[(field, value)]).await
    }
}

#[derive(Debug)]
pub enum StoreError {
    RowNotFound(RowRef),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RowNotFound(row) => write!(f, "record store has no {row}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
