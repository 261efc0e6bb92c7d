use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::model::{format_day, Day};

/// Who the calendar entry is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Guest,
    Tenant,
}

impl EventKind {
    pub fn glyph(&self) -> &'static str {
        match self {
            EventKind::Guest => "🛏️",
            EventKind::Tenant => "🏠",
        }
    }
}

/// An all-day calendar entry covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub kind: EventKind,
    pub title: String,
    #[serde(serialize_with = "serialize_day")]
    pub start: Day,
    #[serde(serialize_with = "serialize_day")]
    pub end: Day,
    pub room_number: String,
    pub location: String,
    pub description: String,
}

fn serialize_day<S: serde::Serializer>(day: &Day, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_day(*day))
}

impl CalendarEvent {
    /// Title is prefixed with the kind's glyph; location names the room.
    pub fn new(
        kind: EventKind,
        title: &str,
        start: Day,
        end: Day,
        room_number: &str,
        facility: &str,
        description: String,
    ) -> Self {
        Self {
            kind,
            title: format!("{} {title}", kind.glyph()),
            start,
            end,
            room_number: room_number.to_string(),
            location: format!("{facility} - Room {room_number}"),
            description,
        }
    }
}

#[derive(Debug)]
pub enum SinkError {
    Unavailable(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Unavailable(e) => write!(f, "calendar unavailable: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Best-effort calendar projection. The booking record is the source of
/// truth; a failed publish is logged by the caller and otherwise ignored.
#[async_trait]
pub trait CalendarSink: Send + Sync {
    async fn publish(&self, event: &CalendarEvent) -> Result<(), SinkError>;
}

/// Appends one JSON object per event to a file.
pub struct JsonlCalendarSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlCalendarSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CalendarSink for JsonlCalendarSink {
    async fn publish(&self, event: &CalendarEvent) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(event).map_err(|e| SinkError::Unavailable(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))
    }
}

/// Calendar turned off: events are dropped after a debug log line.
pub struct DisabledCalendarSink;

#[async_trait]
impl CalendarSink for DisabledCalendarSink {
    async fn publish(&self, event: &CalendarEvent) -> Result<(), SinkError> {
        tracing::debug!("calendar disabled, dropping event {:?}", event.title);
        Ok(())
    }
}
