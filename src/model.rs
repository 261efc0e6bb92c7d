use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

/// Calendar day. The engine never reasons about times of day.
pub type Day = NaiveDate;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a day as written into a record cell. Accepts ISO dates, ISO
/// datetimes (the time part is ignored) and US-style `M/D/YYYY`.
pub fn parse_day(raw: &str) -> Option<Day> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(head) = raw.get(..10)
        && let Ok(day) = NaiveDate::parse_from_str(head, DATE_FORMAT)
    {
        return Some(day);
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

pub fn format_day(day: Day) -> String {
    day.format(DATE_FORMAT).to_string()
}

/// Half-open stay `[check_in, check_out)`. The check-out day itself is not
/// occupied, so a check-out and a check-in on the same day do not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stay {
    pub check_in: Day,
    pub check_out: Day,
}

impl Stay {
    pub fn new(check_in: Day, check_out: Day) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    /// Zero-night and inverted stays are invalid.
    pub fn is_valid(&self) -> bool {
        self.check_out > self.check_in
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            format_day(self.check_in),
            format_day(self.check_out)
        )
    }
}

/// Money in cents. Rates and totals are exact; `75.00 × 3 = 225.00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money(pub i64);

impl Money {
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// `None` when the product does not fit in cents.
    pub fn checked_times(&self, n: i64) -> Option<Money> {
        self.0.checked_mul(n).map(Money)
    }

    /// Parse `75`, `75.5`, `75.00`, `$1,200.00`. At most two decimals.
    pub fn parse(raw: &str) -> Option<Money> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();
        let (negative, digits) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if frac.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        let cents = whole.checked_mul(100)?.checked_add(frac)?;
        Some(Money(if negative { -cents } else { cents }))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Lifecycle state of a booking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Reserved,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Reserved => "Reserved",
            BookingStatus::CheckedIn => "Checked-In",
            BookingStatus::CheckedOut => "Checked-Out",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "reserved" => Some(BookingStatus::Reserved),
            "checkedin" => Some(BookingStatus::CheckedIn),
            "checkedout" => Some(BookingStatus::CheckedOut),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled)
    }

    /// Whether a stored status label still holds the room. Unknown or empty
    /// labels hold it: only the two terminal states release a room.
    pub fn label_blocks_room(label: &str) -> bool {
        !matches!(Self::parse(label), Some(s) if s.is_terminal())
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header names of the booking sheet. Every field is resolved by name.
pub mod columns {
    pub const BOOKING_ID: &str = "Booking ID";
    pub const ROOM_NUMBER: &str = "Room Number";
    pub const ROOM_NAME: &str = "Room Name";
    pub const ROOM_TYPE: &str = "Room Type";
    pub const DAILY_RATE: &str = "Daily Rate";
    pub const CHECK_IN: &str = "Check-In Date";
    pub const CHECK_OUT: &str = "Check-Out Date";
    pub const NIGHTS: &str = "Nights";
    pub const GUESTS: &str = "Number of Guests";
    pub const CURRENT_GUEST: &str = "Current Guest";
    pub const GUEST_EMAIL: &str = "Guest Email";
    pub const GUEST_PHONE: &str = "Guest Phone";
    pub const PURPOSE: &str = "Purpose of Visit";
    pub const TOTAL_AMOUNT: &str = "Total Amount";
    pub const PAYMENT_STATUS: &str = "Payment Status";
    pub const BOOKING_STATUS: &str = "Booking Status";
    pub const SOURCE: &str = "Source";
    pub const NOTES: &str = "Notes";

    /// Layout order used when this engine writes a new row.
    pub const LAYOUT: [&str; 18] = [
        BOOKING_ID,
        ROOM_NUMBER,
        ROOM_NAME,
        ROOM_TYPE,
        DAILY_RATE,
        CHECK_IN,
        CHECK_OUT,
        NIGHTS,
        GUESTS,
        CURRENT_GUEST,
        GUEST_EMAIL,
        GUEST_PHONE,
        PURPOSE,
        TOTAL_AMOUNT,
        PAYMENT_STATUS,
        BOOKING_STATUS,
        SOURCE,
        NOTES,
    ];
}

/// Zero-based data row address in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef(pub usize);

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

/// Ordered mapping from header name to cell value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Cell value by header name; missing columns read as empty.
    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn booking_id(&self) -> &str {
        self.get(columns::BOOKING_ID).trim()
    }

    pub fn room_number(&self) -> &str {
        self.get(columns::ROOM_NUMBER).trim()
    }

    pub fn status_label(&self) -> &str {
        self.get(columns::BOOKING_STATUS).trim()
    }

    /// The stay recorded on this row, if both dates parse.
    pub fn stay(&self) -> Option<Stay> {
        Some(Stay::new(
            parse_day(self.get(columns::CHECK_IN))?,
            parse_day(self.get(columns::CHECK_OUT))?,
        ))
    }
}

/// A record together with its address in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub row: RowRef,
    pub record: Record,
}

// ── Query result types ───────────────────────────────────────────

/// An existing booking that holds the room during part of a candidate stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub booking_id: String,
    pub guest: String,
    pub check_in: String,
    pub check_out: String,
    pub status: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guest = if self.guest.is_empty() {
            "unnamed guest"
        } else {
            &self.guest
        };
        write!(
            f,
            "{guest} ({} to {}, {})",
            self.check_in, self.check_out, self.status
        )
    }
}

/// Display attributes of a room, taken from the last row mentioning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_number: String,
    pub room_name: String,
    pub room_type: String,
    pub daily_rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAvailability {
    pub room_number: String,
    pub room_name: String,
    pub room_type: String,
    pub daily_rate: String,
    pub available: bool,
    pub status: String,
    pub conflicts: Vec<Conflict>,
}

pub const STATUS_AVAILABLE: &str = "Available";
pub const STATUS_BOOKED: &str = "Booked";

/// Availability query result. Never an error: failures are reported with
/// `success = false` and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub success: bool,
    pub rooms: Vec<RoomAvailability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nights: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AvailabilityReport {
    pub fn ok(stay: &Stay, rooms: Vec<RoomAvailability>) -> Self {
        Self {
            success: true,
            rooms,
            nights: Some(stay.nights()),
            date_range: Some(stay.to_string()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            rooms: Vec::new(),
            nights: None,
            date_range: None,
            error: Some(error.into()),
        }
    }
}

// ── Command input types ──────────────────────────────────────────

/// Input for creating a guest booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub guest_name: String,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub number_of_guests: u32,
    pub check_in: Day,
    pub check_out: Day,
    pub room_number: String,
    pub daily_rate: Money,
    pub purpose_of_visit: Option<String>,
    pub source: Option<String>,
    pub payment_status: Option<String>,
}

impl BookingRequest {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfirmation {
    pub booking_id: String,
    pub guest_name: String,
    pub room_number: String,
    pub stay: Stay,
    pub nights: i64,
    pub total_amount: Money,
}

impl fmt::Display for BookingConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Booking {} confirmed for {} in room {}: {} ({} night{}, total {})",
            self.booking_id,
            self.guest_name,
            self.room_number,
            self.stay,
            self.nights,
            if self.nights == 1 { "" } else { "s" },
            self.total_amount
        )
    }
}

/// A recorded tenant lease, announced on the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseNotice {
    pub tenant_name: String,
    pub room_number: String,
    pub lease_start: Day,
    pub lease_end: Day,
    pub monthly_rent: Option<Money>,
    pub tenant_email: Option<String>,
    pub tenant_phone: Option<String>,
}
