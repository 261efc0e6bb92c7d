mod catalog;
mod conflict;
mod error;
mod ident;
mod lifecycle;

pub use catalog::{build_catalog, room_availability, room_summary};
pub use conflict::find_conflicts;
pub use error::EngineError;
pub use ident::{BookingIdGenerator, Clock, BOOKING_ID_PREFIX};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::calendar::{CalendarEvent, CalendarSink};
use crate::store::RecordStore;

/// Reservation engine for one facility.
///
/// The record store has no transactions, so the check-then-append in
/// `create_booking` is serialised per room with an in-process lock. Writers
/// outside this process that share the store are not covered.
pub struct Engine {
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) calendar: Arc<dyn CalendarSink>,
    /// Calendar location label, e.g. "Guest House".
    pub(super) facility: String,
    pub(super) ids: BookingIdGenerator,
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        calendar: Arc<dyn CalendarSink>,
        facility: impl Into<String>,
    ) -> Self {
        Self {
            store,
            calendar,
            facility: facility.into(),
            ids: BookingIdGenerator::new(),
            room_locks: DashMap::new(),
        }
    }

    pub fn with_id_generator(mut self, ids: BookingIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Serialisation point for everything that reads-then-writes one room.
    pub(super) async fn lock_room(&self, room_number: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .room_locks
            .entry(room_number.trim().to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Fire-and-forget publish: failures are counted and logged, never returned.
    pub(super) async fn publish_best_effort(&self, event: &CalendarEvent) {
        if let Err(e) = self.calendar.publish(event).await {
            metrics::counter!(crate::observability::CALENDAR_FAILURES_TOTAL).increment(1);
            tracing::warn!("calendar event {:?} not published: {e}", event.title);
        }
    }
}
