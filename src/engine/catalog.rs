use crate::model::*;

use super::conflict::{find_conflicts, validate_query_stay};
use super::{Engine, EngineError};

/// Distinct rooms in first-seen order. Display attributes come from the
/// last row mentioning each room; rows without a room number are ignored.
pub fn build_catalog(records: &[StoredRecord]) -> Vec<RoomSummary> {
    let mut rooms: Vec<RoomSummary> = Vec::new();
    for stored in records {
        let record = &stored.record;
        let room_number = record.room_number();
        if room_number.is_empty() {
            continue;
        }
        let summary = RoomSummary {
            room_number: room_number.to_string(),
            room_name: record.get(columns::ROOM_NAME).trim().to_string(),
            room_type: record.get(columns::ROOM_TYPE).trim().to_string(),
            daily_rate: record.get(columns::DAILY_RATE).trim().to_string(),
        };
        match rooms.iter_mut().find(|r| r.room_number == room_number) {
            Some(existing) => *existing = summary,
            None => rooms.push(summary),
        }
    }
    rooms
}

/// Display attributes for one room, or `None` if no row mentions it.
pub fn room_summary(records: &[StoredRecord], room_number: &str) -> Option<RoomSummary> {
    let room_number = room_number.trim();
    build_catalog(records)
        .into_iter()
        .find(|r| r.room_number == room_number)
}

/// Availability of every known room for `stay`, from a single scan.
pub fn room_availability(records: &[StoredRecord], stay: &Stay) -> Vec<RoomAvailability> {
    build_catalog(records)
        .into_iter()
        .map(|room| {
            let conflicts = find_conflicts(records, &room.room_number, stay);
            let available = conflicts.is_empty();
            RoomAvailability {
                room_number: room.room_number,
                room_name: room.room_name,
                room_type: room.room_type,
                daily_rate: room.daily_rate,
                available,
                status: if available {
                    STATUS_AVAILABLE.to_string()
                } else {
                    STATUS_BOOKED.to_string()
                },
                conflicts,
            }
        })
        .collect()
}

impl Engine {
    /// Per-room availability for a date range given as ISO date strings.
    /// Never fails: problems are reported in the result.
    pub async fn available_rooms(&self, start: &str, end: &str) -> AvailabilityReport {
        let (Some(check_in), Some(check_out)) = (parse_day(start), parse_day(end)) else {
            return AvailabilityReport::failed(format!(
                "invalid date range: {start:?} to {end:?} (expected YYYY-MM-DD)"
            ));
        };
        let stay = Stay::new(check_in, check_out);
        match self.room_availability(stay).await {
            Ok(rooms) => AvailabilityReport::ok(&stay, rooms),
            Err(e) => {
                tracing::warn!("availability query for {stay} failed: {e}");
                AvailabilityReport::failed(e.to_string())
            }
        }
    }

    pub async fn room_availability(&self, stay: Stay) -> Result<Vec<RoomAvailability>, EngineError> {
        validate_query_stay(&stay)?;
        let records = self.store.scan_all().await?;
        Ok(room_availability(&records, &stay))
    }
}
