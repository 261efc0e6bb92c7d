use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::{Record, RowRef, StoredRecord};
use crate::wal::{Mark, Wal};

use super::{RecordStore, Sheet, SheetEvent, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        events: Vec<SheetEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<SheetEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// What the group-commit writer needs from a log.
trait GroupLog {
    type Mark: Copy;

    fn mark(&self) -> Self::Mark;
    fn rewind(&mut self, mark: Self::Mark);
    fn append_buffered(&mut self, event: &SheetEvent) -> io::Result<()>;
    fn flush_sync(&mut self) -> io::Result<()>;
}

impl GroupLog for Wal {
    type Mark = Mark;

    fn mark(&self) -> Mark {
        Wal::mark(self)
    }

    fn rewind(&mut self, mark: Mark) {
        Wal::rewind(self, mark)
    }

    fn append_buffered(&mut self, event: &SheetEvent) -> io::Result<()> {
        Wal::append_buffered(self, event)
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        Wal::flush_sync(self)
    }
}

/// Background task that owns the WAL and batches appends for group commit.
/// Each append waits for the first one to arrive, takes whatever else is
/// already queued, and shares one fsync with it. A non-append command found
/// while draining runs after the batch is answered.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let results = flush_batch(&mut wal, batch.iter().map(|(events, _)| events.as_slice()));
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                for ((_, tx), result) in batch.into_iter().zip(results) {
                    let _ = tx.send(result);
                }

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Buffer each caller's events as a unit and flush once. A caller whose
/// events fail to buffer is rewound and told so without affecting the rest;
/// a failed flush fails every caller that was still in the batch. The
/// result for each caller matches what is on disk for it.
fn flush_batch<'a, L: GroupLog>(
    log: &mut L,
    batch: impl IntoIterator<Item = &'a [SheetEvent]>,
) -> Vec<io::Result<()>> {
    let mut results: Vec<io::Result<()>> = Vec::new();
    for events in batch {
        let mark = log.mark();
        let buffered = events.iter().try_for_each(|event| log.append_buffered(event));
        if buffered.is_err() {
            log.rewind(mark);
        }
        results.push(buffered);
    }

    if let Err(e) = log.flush_sync() {
        for result in results.iter_mut().filter(|r| r.is_ok()) {
            *result = Err(io::Error::new(e.kind(), e.to_string()));
        }
    }
    results
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable record store: the sheet lives in memory and every mutation is
/// logged to a WAL before it is applied.
pub struct WalStore {
    sheet: RwLock<Sheet>,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
}

impl WalStore {
    /// Replay `path` into a fresh sheet and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let mut sheet = Sheet::new();
        for event in &events {
            sheet.apply(event);
        }
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            sheet: RwLock::new(sheet),
            wal_tx,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn wal_append(&self, events: Vec<SheetEvent>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as a snapshot of the current sheet. Writers are held
    /// off for the duration so nothing lands between snapshot and swap.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let sheet = self.sheet.read().await;
        let events = sheet.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()));
        drop(sheet);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for WalStore {
    async fn scan_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.sheet.read().await.records())
    }

    async fn append(&self, record: Record) -> Result<RowRef, StoreError> {
        let mut sheet = self.sheet.write().await;
        let events = sheet.plan_append(&record);
        self.wal_append(events.clone()).await?;
        for event in &events {
            sheet.apply(event);
        }
        Ok(RowRef(sheet.row_count() - 1))
    }

    async fn update_fields(&self, row: RowRef, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut sheet = self.sheet.write().await;
        let events = sheet.plan_update(row, fields)?;
        self.wal_append(events.clone()).await?;
        for event in &events {
            sheet.apply(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::columns;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        {
            let store = WalStore::open(&path).unwrap();
            store
                .append(
                    Record::new()
                        .with(columns::BOOKING_ID, "BK00000101")
                        .with(columns::BOOKING_STATUS, "Reserved"),
                )
                .await
                .unwrap();
            store
                .update_field(RowRef(0), columns::BOOKING_STATUS, "Checked-In")
                .await
                .unwrap();
        }

        let reopened = WalStore::open(&path).unwrap();
        let all = reopened.scan_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.booking_id(), "BK00000101");
        assert_eq!(all[0].record.status_label(), "Checked-In");
    }

    #[tokio::test]
    async fn failed_update_writes_nothing() {
        let path = test_wal_path("failed_update.wal");
        let store = WalStore::open(&path).unwrap();
        let err = store
            .update_field(RowRef(5), columns::NOTES, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound(RowRef(5))));
        assert_eq!(store.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn compact_preserves_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        {
            let store = WalStore::open(&path).unwrap();
            store
                .append(Record::new().with(columns::ROOM_NUMBER, "101"))
                .await
                .unwrap();
            for i in 0..10 {
                store
                    .update_field(RowRef(0), columns::NOTES, &format!("note {i}"))
                    .await
                    .unwrap();
            }
            assert!(store.appends_since_compact().await > 10);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);

            store
                .append(Record::new().with(columns::ROOM_NUMBER, "102"))
                .await
                .unwrap();
        }

        let reopened = WalStore::open(&path).unwrap();
        let all = reopened.scan_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].record.get(columns::NOTES), "note 9");
        assert_eq!(all[1].record.room_number(), "102");
    }

    /// In-memory log that refuses to buffer cells holding `refuse`, and can
    /// be told to fail its next flush.
    #[derive(Default)]
    struct ScriptedLog {
        pending: Vec<SheetEvent>,
        durable: Vec<SheetEvent>,
        fail_flush: bool,
    }

    impl GroupLog for ScriptedLog {
        type Mark = usize;

        fn mark(&self) -> usize {
            self.pending.len()
        }

        fn rewind(&mut self, mark: usize) {
            self.pending.truncate(mark);
        }

        fn append_buffered(&mut self, event: &SheetEvent) -> io::Result<()> {
            if let SheetEvent::CellUpdated { value, .. } = event
                && value == "refuse"
            {
                return Err(io::Error::other("cannot encode"));
            }
            self.pending.push(event.clone());
            Ok(())
        }

        fn flush_sync(&mut self) -> io::Result<()> {
            if std::mem::take(&mut self.fail_flush) {
                self.pending.clear();
                return Err(io::Error::other("disk full"));
            }
            self.durable.append(&mut self.pending);
            Ok(())
        }
    }

    fn cell(value: &str) -> SheetEvent {
        SheetEvent::CellUpdated {
            row: 0,
            column: 0,
            value: value.into(),
        }
    }

    #[test]
    fn batch_answers_each_caller_by_its_own_events() {
        let mut log = ScriptedLog::default();
        let first = vec![cell("a"), cell("b")];
        let broken = vec![cell("c"), cell("refuse"), cell("d")];
        let last = vec![cell("e")];

        let results = flush_batch(
            &mut log,
            [first.as_slice(), broken.as_slice(), last.as_slice()],
        );

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(log.durable, vec![cell("a"), cell("b"), cell("e")]);
    }

    #[test]
    fn failed_flush_fails_the_whole_batch() {
        let mut log = ScriptedLog {
            fail_flush: true,
            ..Default::default()
        };
        let results = flush_batch(&mut log, [[cell("a")].as_slice(), [cell("b")].as_slice()]);
        assert!(results.iter().all(|r| r.is_err()));
        assert!(log.durable.is_empty());
    }
}
