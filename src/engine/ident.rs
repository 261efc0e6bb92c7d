use std::collections::VecDeque;
use std::sync::Mutex;

use crate::limits::{MAX_ID_ATTEMPTS, RECENT_ID_WINDOW};

use super::EngineError;

pub const BOOKING_ID_PREFIX: &str = "BK";

pub type Clock = fn() -> i64;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Human-readable booking ids: `BK` + last 6 digits of the millisecond
/// clock + 2 random digits, e.g. `BK48213907`.
///
/// The space is small, so candidates are checked against ids already in the
/// store and ids this process issued recently before one is accepted.
pub struct BookingIdGenerator {
    clock: Clock,
    recent: Mutex<VecDeque<String>>,
}

impl Default for BookingIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingIdGenerator {
    pub fn new() -> Self {
        Self::with_clock(now_ms)
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ID_WINDOW)),
        }
    }

    pub fn candidate(&self) -> String {
        let tail = (self.clock)().rem_euclid(1_000_000);
        let suffix: u32 = rand::random_range(0..100);
        format!("{BOOKING_ID_PREFIX}{tail:06}{suffix:02}")
    }

    /// First candidate that `taken` rejects neither in the store nor in the
    /// recently-issued window.
    pub fn next_unused(&self, taken: impl Fn(&str) -> bool) -> Result<String, EngineError> {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.candidate();
            if taken(&id) || recent.contains(&id) {
                continue;
            }
            if recent.len() >= RECENT_ID_WINDOW {
                recent.pop_front();
            }
            recent.push_back(id.clone());
            return Ok(id);
        }
        Err(EngineError::IdSpaceExhausted)
    }
}
