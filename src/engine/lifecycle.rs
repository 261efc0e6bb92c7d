use chrono::Utc;
use tracing::info;

use crate::calendar::{CalendarEvent, EventKind};
use crate::limits::*;
use crate::model::*;

use super::catalog::room_summary;
use super::conflict::{find_conflicts, validate_room_number};
use super::{Engine, EngineError};

const DEFAULT_SOURCE: &str = "Direct";
const DEFAULT_PAYMENT_STATUS: &str = "Pending";

fn check_len(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_request(req: &BookingRequest) -> Result<Stay, EngineError> {
    if req.guest_name.trim().is_empty() {
        return Err(EngineError::Validation("guest name is required".into()));
    }
    validate_room_number(&req.room_number)?;
    let stay = req.stay();
    if !stay.is_valid() {
        return Err(EngineError::Validation(format!(
            "check-out date {} must be after check-in date {}",
            format_day(stay.check_out),
            format_day(stay.check_in)
        )));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if req.daily_rate.cents() < 0 {
        return Err(EngineError::Validation("daily rate cannot be negative".into()));
    }
    if req.number_of_guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    check_len(&req.guest_name, "guest name too long")?;
    for (value, what) in [
        (&req.guest_email, "guest email too long"),
        (&req.guest_phone, "guest phone too long"),
        (&req.purpose_of_visit, "purpose of visit too long"),
        (&req.source, "source too long"),
        (&req.payment_status, "payment status too long"),
    ] {
        if let Some(v) = value {
            check_len(v, what)?;
        }
    }
    Ok(stay)
}

fn note_line(text: &str) -> String {
    format!("[{}] {text}", Utc::now().format("%Y-%m-%d %H:%M"))
}

/// Notes are an audit trail: new lines are appended, never overwritten.
fn append_note(existing: &str, text: &str) -> String {
    let existing = existing.trim_end();
    if existing.is_empty() {
        note_line(text)
    } else {
        format!("{existing}\n{}", note_line(text))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn guest_description(req: &BookingRequest, booking_id: &str, stay: &Stay, total: Money) -> String {
    let mut lines = vec![
        format!("Guest: {}", req.guest_name.trim()),
        format!("Room: {}", req.room_number.trim()),
        format!("Stay: {stay}"),
        format!("Guests: {}", req.number_of_guests),
        format!("Booking ID: {booking_id}"),
        format!("Total: {total}"),
    ];
    if let Some(email) = non_empty(&req.guest_email) {
        lines.push(format!("Email: {email}"));
    }
    if let Some(phone) = non_empty(&req.guest_phone) {
        lines.push(format!("Phone: {phone}"));
    }
    if let Some(purpose) = non_empty(&req.purpose_of_visit) {
        lines.push(format!("Purpose: {purpose}"));
    }
    lines.join("\n")
}

impl Engine {
    /// Reserve a room. Conflicts are re-checked under the room's lock right
    /// before the row is appended; the calendar entry is best-effort.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let stay = validate_request(&req)?;
        let nights = stay.nights();
        let total = req
            .daily_rate
            .checked_times(nights)
            .ok_or(EngineError::LimitExceeded("daily rate too large"))?;
        let room_number = req.room_number.trim().to_string();
        let guest_name = req.guest_name.trim().to_string();

        let guard = self.lock_room(&room_number).await;
        let records = self.store.scan_all().await?;

        let conflicts = find_conflicts(&records, &room_number, &stay);
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::RoomUnavailable {
                room: room_number,
                conflicts,
            });
        }

        let booking_id =
            self.ids
                .next_unused(|candidate| records.iter().any(|r| r.record.booking_id() == candidate))?;
        let room = room_summary(&records, &room_number);
        let source = non_empty(&req.source).unwrap_or(DEFAULT_SOURCE);
        let payment_status = non_empty(&req.payment_status).unwrap_or(DEFAULT_PAYMENT_STATUS);

        let record = Record::new()
            .with(columns::BOOKING_ID, booking_id.as_str())
            .with(columns::ROOM_NUMBER, room_number.as_str())
            .with(
                columns::ROOM_NAME,
                room.as_ref().map(|r| r.room_name.as_str()).unwrap_or(""),
            )
            .with(
                columns::ROOM_TYPE,
                room.as_ref().map(|r| r.room_type.as_str()).unwrap_or(""),
            )
            .with(columns::DAILY_RATE, req.daily_rate.to_string())
            .with(columns::CHECK_IN, format_day(stay.check_in))
            .with(columns::CHECK_OUT, format_day(stay.check_out))
            .with(columns::NIGHTS, nights.to_string())
            .with(columns::GUESTS, req.number_of_guests.to_string())
            .with(columns::CURRENT_GUEST, guest_name.as_str())
            .with(columns::GUEST_EMAIL, non_empty(&req.guest_email).unwrap_or(""))
            .with(columns::GUEST_PHONE, non_empty(&req.guest_phone).unwrap_or(""))
            .with(columns::PURPOSE, non_empty(&req.purpose_of_visit).unwrap_or(""))
            .with(columns::TOTAL_AMOUNT, total.to_string())
            .with(columns::PAYMENT_STATUS, payment_status)
            .with(columns::BOOKING_STATUS, BookingStatus::Reserved.as_str())
            .with(columns::SOURCE, source)
            .with(columns::NOTES, note_line(&format!("Reserved via {source}")));

        let row = self.store.append(record).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!("booking {booking_id} reserved: room {room_number}, {stay}, {row}");

        let event = CalendarEvent::new(
            EventKind::Guest,
            &format!("{guest_name} - Room {room_number}"),
            stay.check_in,
            stay.check_out,
            &room_number,
            &self.facility,
            guest_description(&req, &booking_id, &stay, total),
        );
        self.publish_best_effort(&event).await;

        Ok(BookingConfirmation {
            booking_id,
            guest_name,
            room_number,
            stay,
            nights,
            total_amount: total,
        })
    }

    pub async fn check_in(&self, booking_id: &str) -> Result<String, EngineError> {
        let record = self
            .transition(booking_id, BookingStatus::CheckedIn, "Checked in")
            .await?;
        Ok(format!(
            "Checked in {} to room {} (booking {})",
            display_guest(&record),
            record.room_number(),
            record.booking_id()
        ))
    }

    /// Also clears the current-guest field so the room reads as unoccupied.
    pub async fn check_out(&self, booking_id: &str) -> Result<String, EngineError> {
        let record = self
            .transition(booking_id, BookingStatus::CheckedOut, "Checked out")
            .await?;
        Ok(format!(
            "Checked out {} from room {} (booking {})",
            display_guest(&record),
            record.room_number(),
            record.booking_id()
        ))
    }

    pub async fn cancel_booking(&self, booking_id: &str) -> Result<String, EngineError> {
        let record = self
            .transition(booking_id, BookingStatus::Cancelled, "Cancelled")
            .await?;
        Ok(format!(
            "Cancelled booking {} for room {}",
            record.booking_id(),
            record.room_number()
        ))
    }

    /// Set the status unconditionally and append a note. No ordering is
    /// enforced between states. Returns the record as it was before the update.
    async fn transition(
        &self,
        booking_id: &str,
        to: BookingStatus,
        note: &str,
    ) -> Result<Record, EngineError> {
        let booking_id = booking_id.trim();
        if booking_id.is_empty() {
            return Err(EngineError::BookingNotFound(String::new()));
        }

        // Locate once to learn the room, then again under its lock so the
        // notes we append to are current.
        let room_number = self.find_booking(booking_id).await?.record.room_number().to_string();
        let _guard = self.lock_room(&room_number).await;
        let found = self.find_booking(booking_id).await?;

        let notes = append_note(found.record.get(columns::NOTES), note);
        let mut fields = vec![
            (columns::BOOKING_STATUS, to.as_str()),
            (columns::NOTES, notes.as_str()),
        ];
        if to == BookingStatus::CheckedOut {
            fields.push((columns::CURRENT_GUEST, ""));
        }
        // One write: the status never changes without its note.
        self.store.update_fields(found.row, &fields).await?;

        metrics::counter!(crate::observability::BOOKING_TRANSITIONS_TOTAL, "status" => to.as_str())
            .increment(1);
        info!(
            "booking {booking_id} -> {to} (was {:?}, room {room_number})",
            found.record.status_label()
        );
        Ok(found.record)
    }

    /// First record whose Booking ID equals `booking_id`. Linear scan.
    pub async fn find_booking(&self, booking_id: &str) -> Result<StoredRecord, EngineError> {
        let booking_id = booking_id.trim();
        if booking_id.is_empty() {
            return Err(EngineError::BookingNotFound(String::new()));
        }
        self.store
            .scan_all()
            .await?
            .into_iter()
            .find(|r| r.record.booking_id() == booking_id)
            .ok_or_else(|| EngineError::BookingNotFound(booking_id.to_string()))
    }

    /// Every record for a room, active or not, in store order.
    pub async fn room_bookings(&self, room_number: &str) -> Result<Vec<StoredRecord>, EngineError> {
        validate_room_number(room_number)?;
        let room_number = room_number.trim();
        Ok(self
            .store
            .scan_all()
            .await?
            .into_iter()
            .filter(|r| r.record.room_number() == room_number)
            .collect())
    }

    /// Put a recorded tenant lease on the calendar. Only the calendar entry
    /// is produced here; sink failures are logged and swallowed.
    pub async fn announce_lease(&self, lease: LeaseNotice) -> Result<String, EngineError> {
        let tenant = lease.tenant_name.trim();
        if tenant.is_empty() {
            return Err(EngineError::Validation("tenant name is required".into()));
        }
        check_len(tenant, "tenant name too long")?;
        validate_room_number(&lease.room_number)?;
        let term = Stay::new(lease.lease_start, lease.lease_end);
        if !term.is_valid() {
            return Err(EngineError::Validation(
                "lease end must be after lease start".into(),
            ));
        }
        let room_number = lease.room_number.trim();

        let mut lines = vec![
            format!("Tenant: {tenant}"),
            format!("Room: {room_number}"),
            format!("Lease: {term}"),
        ];
        if let Some(rent) = lease.monthly_rent {
            lines.push(format!("Monthly rent: {rent}"));
        }
        if let Some(email) = non_empty(&lease.tenant_email) {
            lines.push(format!("Email: {email}"));
        }
        if let Some(phone) = non_empty(&lease.tenant_phone) {
            lines.push(format!("Phone: {phone}"));
        }

        let event = CalendarEvent::new(
            EventKind::Tenant,
            &format!("{tenant} - Room {room_number}"),
            term.check_in,
            term.check_out,
            room_number,
            &self.facility,
            lines.join("\n"),
        );
        self.publish_best_effort(&event).await;
        info!("lease announced: {tenant}, room {room_number}, {term}");
        Ok(format!("Lease for {tenant} in room {room_number} recorded ({term})"))
    }
}

fn display_guest(record: &Record) -> &str {
    let guest = record.get(columns::CURRENT_GUEST).trim();
    if guest.is_empty() { "guest" } else { guest }
}
