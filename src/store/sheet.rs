use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{Record, RowRef, StoredRecord};

use super::StoreError;

/// Sheet mutations, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SheetEvent {
    ColumnAdded { name: String },
    RowAppended { cells: Vec<String> },
    CellUpdated { row: u64, column: u64, value: String },
}

/// A header row plus data rows of string cells. Columns are positional in
/// storage but every lookup goes through the header name.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column whose header matches `name` (surrounding whitespace ignored).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Every data row as a by-name record. Blank headers are skipped; for a
    /// duplicated header the leftmost column wins.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, cells)| {
                let mut record = Record::new();
                let mut seen = HashSet::new();
                for (col, header) in self.headers.iter().enumerate() {
                    let name = header.trim();
                    if name.is_empty() || !seen.insert(name) {
                        continue;
                    }
                    let value = cells.get(col).map(String::as_str).unwrap_or("");
                    record.set(name, value);
                }
                StoredRecord {
                    row: RowRef(i),
                    record,
                }
            })
            .collect()
    }

    /// Events that append `record` as a new row, adding any missing columns first.
    pub fn plan_append(&self, record: &Record) -> Vec<SheetEvent> {
        let mut events = Vec::new();
        let mut headers: Vec<String> = self.headers.clone();
        let mut placed: Vec<(usize, String)> = Vec::with_capacity(record.len());

        for (name, value) in record.fields() {
            let idx = match headers.iter().position(|h| h.trim() == name.trim()) {
                Some(idx) => idx,
                None => {
                    headers.push(name.to_string());
                    events.push(SheetEvent::ColumnAdded {
                        name: name.to_string(),
                    });
                    headers.len() - 1
                }
            };
            placed.push((idx, value.to_string()));
        }

        let mut cells = vec![String::new(); headers.len()];
        for (idx, value) in placed {
            cells[idx] = value;
        }
        events.push(SheetEvent::RowAppended { cells });
        events
    }

    /// Events that overwrite cells of one row, adding any missing columns.
    /// The whole list is logged and applied as one unit.
    pub fn plan_update(
        &self,
        row: RowRef,
        fields: &[(&str, &str)],
    ) -> Result<Vec<SheetEvent>, StoreError> {
        if row.0 >= self.rows.len() {
            return Err(StoreError::RowNotFound(row));
        }
        let mut events = Vec::new();
        let mut added: Vec<&str> = Vec::new();
        for (field, value) in fields {
            let column = match self.column_index(field) {
                Some(idx) => idx,
                None => match added.iter().position(|a| a.trim() == field.trim()) {
                    Some(i) => self.headers.len() + i,
                    None => {
                        events.push(SheetEvent::ColumnAdded {
                            name: field.to_string(),
                        });
                        added.push(*field);
                        self.headers.len() + added.len() - 1
                    }
                },
            };
            events.push(SheetEvent::CellUpdated {
                row: row.0 as u64,
                column: column as u64,
                value: value.to_string(),
            });
        }
        Ok(events)
    }

    pub fn apply(&mut self, event: &SheetEvent) {
        match event {
            SheetEvent::ColumnAdded { name } => self.headers.push(name.clone()),
            SheetEvent::RowAppended { cells } => self.rows.push(cells.clone()),
            SheetEvent::CellUpdated { row, column, value } => {
                let (row, column) = (*row as usize, *column as usize);
                if let Some(cells) = self.rows.get_mut(row) {
                    if cells.len() <= column {
                        cells.resize(column + 1, String::new());
                    }
                    cells[column] = value.clone();
                }
            }
        }
    }

    /// Minimal event list that recreates the current sheet.
    pub fn snapshot(&self) -> Vec<SheetEvent> {
        let mut events: Vec<SheetEvent> = self
            .headers
            .iter()
            .map(|h| SheetEvent::ColumnAdded { name: h.clone() })
            .collect();
        events.extend(self.rows.iter().map(|cells| SheetEvent::RowAppended {
            cells: cells.clone(),
        }));
        events
    }
}
