/// Longest accepted free-text input field (names, emails, notes lines).
pub const MAX_FIELD_LEN: usize = 512;

/// Longest stay a single booking may cover.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest window an availability or conflict query may span.
pub const MAX_QUERY_NIGHTS: i64 = 731;

/// Largest party accepted on one booking.
pub const MAX_GUESTS: u32 = 64;

/// Identifier candidates tried before a create gives up.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Identifiers remembered in-process to avoid handing one out twice
/// before its row is visible in a scan.
pub const RECENT_ID_WINDOW: usize = 256;

/// Maximum facilities (databases) served by one process.
pub const MAX_FACILITIES: usize = 1024;

pub const MAX_FACILITY_NAME_LEN: usize = 128;
