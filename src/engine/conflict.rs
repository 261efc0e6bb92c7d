use crate::limits::{MAX_FIELD_LEN, MAX_QUERY_NIGHTS};
use crate::model::*;

use super::{Engine, EngineError};

/// Existing bookings on `room_number` that hold the room during `stay`.
///
/// A row is a candidate when its room matches and its status is not
/// terminal (Checked-Out / Cancelled). Overlap is half-open, so a stay
/// ending on the day another begins is not a conflict.
pub fn find_conflicts(records: &[StoredRecord], room_number: &str, stay: &Stay) -> Vec<Conflict> {
    let room_number = room_number.trim();
    let mut conflicts = Vec::new();
    for stored in records {
        let record = &stored.record;
        if record.room_number() != room_number {
            continue;
        }
        if !BookingStatus::label_blocks_room(record.status_label()) {
            continue;
        }
        let Some(existing) = record.stay() else {
            tracing::debug!(
                "skipping {} for room {room_number}: unreadable stay dates",
                stored.row
            );
            continue;
        };
        if existing.overlaps(stay) {
            conflicts.push(Conflict {
                booking_id: record.booking_id().to_string(),
                guest: record.get(columns::CURRENT_GUEST).trim().to_string(),
                check_in: format_day(existing.check_in),
                check_out: format_day(existing.check_out),
                status: record.status_label().to_string(),
            });
        }
    }
    conflicts
}

pub(crate) fn validate_query_stay(stay: &Stay) -> Result<(), EngineError> {
    if !stay.is_valid() {
        return Err(EngineError::Validation(
            "end date must be after start date".into(),
        ));
    }
    if stay.nights() > MAX_QUERY_NIGHTS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_room_number(room_number: &str) -> Result<(), EngineError> {
    if room_number.trim().is_empty() {
        return Err(EngineError::Validation("room number is required".into()));
    }
    if room_number.len() > MAX_FIELD_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    Ok(())
}

impl Engine {
    /// Scan the store and report bookings that block `room_number` for `stay`.
    pub async fn find_conflicts(
        &self,
        room_number: &str,
        stay: Stay,
    ) -> Result<Vec<Conflict>, EngineError> {
        validate_room_number(room_number)?;
        validate_query_stay(&stay)?;
        let records = self.store.scan_all().await?;
        Ok(find_conflicts(&records, room_number, &stay))
    }
}
