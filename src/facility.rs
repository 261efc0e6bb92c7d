use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::calendar::{CalendarSink, DisabledCalendarSink, JsonlCalendarSink};
use crate::compactor;
use crate::config::CalendarMode;
use crate::engine::Engine;
use crate::limits::*;
use crate::store::WalStore;

/// Manages per-facility engines. Each facility gets its own Engine, WAL,
/// calendar file and compactor. Facility = database name from the pgwire
/// connection.
pub struct FacilityManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    label: String,
    calendar: CalendarMode,
}

impl FacilityManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        label: impl Into<String>,
        calendar: CalendarMode,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            label: label.into(),
            calendar,
        }
    }

    /// Get or lazily open the engine for the given facility. Names that
    /// sanitize to the same file name share one engine.
    pub fn get_or_create(&self, facility: &str) -> std::io::Result<Arc<Engine>> {
        if facility.len() > MAX_FACILITY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "facility name too long",
            ));
        }

        // Sanitize to prevent path traversal
        let safe_name: String = facility
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty facility name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_FACILITIES {
            return Err(std::io::Error::other("too many facilities"));
        }

        // Keyed by file name: one WAL, one writer task, one set of room locks.
        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = Arc::new(WalStore::open(&wal_path)?);
        let calendar: Arc<dyn CalendarSink> = match self.calendar {
            CalendarMode::File => Arc::new(JsonlCalendarSink::new(
                &self.data_dir.join(format!("{safe_name}.calendar.jsonl")),
            )),
            CalendarMode::Off => Arc::new(DisabledCalendarSink),
        };
        let engine = Arc::new(Engine::new(store.clone(), calendar, self.label.clone()));

        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(store, threshold).await;
        });

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::FACILITIES_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened facility {facility:?} ({})", wal_path.display());
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_facility").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> FacilityManager {
        FacilityManager::new(dir, 1000, "Guest House", CalendarMode::File)
    }

    fn request(room: &str) -> BookingRequest {
        let day = |s| NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap();
        BookingRequest {
            guest_name: "Ada".into(),
            guest_email: None,
            guest_phone: None,
            number_of_guests: 1,
            check_in: day("2024-06-01"),
            check_out: day("2024-06-05"),
            room_number: room.into(),
            daily_rate: Money(7500),
            purpose_of_visit: None,
            source: None,
            payment_status: None,
        }
    }

    #[tokio::test]
    async fn facility_isolation() {
        let dir = test_data_dir("isolation");
        let fm = manager(dir);

        let north = fm.get_or_create("north_wing").unwrap();
        let south = fm.get_or_create("south_wing").unwrap();

        north.create_booking(request("101")).await.unwrap();
        // Same room number, other facility: no conflict
        south.create_booking(request("101")).await.unwrap();

        let report = south.available_rooms("2024-06-01", "2024-06-05").await;
        assert_eq!(report.rooms.len(), 1);
        assert!(!report.rooms[0].available);
        assert_eq!(fm.len(), 2);
    }

    #[tokio::test]
    async fn facility_lazy_creation() {
        let dir = test_data_dir("lazy");
        let fm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());
        assert!(fm.is_empty());

        let engine = fm.get_or_create("harbour").unwrap();
        assert!(dir.join("harbour.wal").exists());

        engine.create_booking(request("7")).await.unwrap();
        let calendar = fs::read_to_string(dir.join("harbour.calendar.jsonl")).unwrap();
        assert_eq!(calendar.lines().count(), 1);
    }

    #[tokio::test]
    async fn calendar_off_writes_no_file() {
        let dir = test_data_dir("calendar_off");
        let fm = FacilityManager::new(dir.clone(), 1000, "Guest House", CalendarMode::Off);
        let engine = fm.get_or_create("quiet").unwrap();
        engine.create_booking(request("7")).await.unwrap();
        assert!(!dir.join("quiet.calendar.jsonl").exists());
    }

    #[tokio::test]
    async fn facility_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let fm = manager(dir);

        let eng1 = fm.get_or_create("foo").unwrap();
        let eng2 = fm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn facility_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let fm = manager(dir.clone());

        let _eng = fm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = fm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn aliasing_names_share_one_engine() {
        let dir = test_data_dir("alias");
        let booked = {
            let fm = manager(dir.clone());
            let plain = fm.get_or_create("inn").unwrap();
            let dotted = fm.get_or_create("inn.").unwrap();
            assert!(Arc::ptr_eq(&plain, &dotted));
            assert_eq!(fm.len(), 1);

            plain.create_booking(request("101")).await.unwrap();
            let err = dotted.create_booking(request("101")).await.unwrap_err();
            assert!(matches!(err, crate::engine::EngineError::RoomUnavailable { .. }));
            plain.room_bookings("101").await.unwrap().len()
        };
        assert_eq!(booked, 1);

        let fm = manager(dir);
        let reopened = fm.get_or_create("i.n.n").unwrap();
        assert_eq!(reopened.room_bookings("101").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn facility_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let fm = manager(dir);

        let long_name = "x".repeat(MAX_FACILITY_NAME_LEN + 1);
        let err = fm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("facility name too long"));
    }

    #[tokio::test]
    async fn bookings_survive_reopen() {
        let dir = test_data_dir("reopen");
        let booking_id = {
            let fm = manager(dir.clone());
            let engine = fm.get_or_create("inn").unwrap();
            engine.create_booking(request("3")).await.unwrap().booking_id
        };

        let fm = manager(dir);
        let engine = fm.get_or_create("inn").unwrap();
        let found = engine.find_booking(&booking_id).await.unwrap();
        assert_eq!(found.record.room_number(), "3");
    }
}
