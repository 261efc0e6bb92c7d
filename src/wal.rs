use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::store::SheetEvent;

const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event as one `[len][bincode][crc32]` frame.
fn encode_event(writer: &mut impl Write, event: &SheetEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Position in the pending buffer, taken before buffering one caller's events
/// so they can be dropped again if any of them fails to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    bytes: usize,
    events: u64,
}

/// Append-only log of sheet mutations.
///
/// Each frame is `[u32 len][bincode SheetEvent][u32 crc32]`. Events are
/// encoded into an in-memory buffer and only reach the file in `flush_sync`.
/// A flush either lands every buffered frame or, after truncating the file
/// back to its last durable length, none of them.
pub struct Wal {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    durable_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`. A torn tail left by a crash is cut
    /// off so that new frames follow the last readable one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (_, valid_len) = Self::scan(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            durable_len: valid_len,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &SheetEvent) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn mark(&self) -> Mark {
        Mark {
            bytes: self.pending.len(),
            events: self.pending_events,
        }
    }

    /// Drop everything buffered after `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        if mark.bytes > self.pending.len() {
            return;
        }
        self.pending.truncate(mark.bytes);
        let dropped = self.pending_events - mark.events;
        self.pending_events = mark.events;
        self.appends_since_compact -= dropped;
    }

    /// Buffer one frame. Nothing is written until `flush_sync`.
    pub fn append_buffered(&mut self, event: &SheetEvent) -> io::Result<()> {
        let mark = self.mark();
        if let Err(e) = encode_event(&mut self.pending, event) {
            self.pending.truncate(mark.bytes);
            return Err(e);
        }
        self.pending_events += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Write the buffered frames and fsync. On failure the file is cut back
    /// to its previous durable length and the buffer is discarded.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_all());
        match result {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.pending.clear();
                self.pending_events = 0;
                Ok(())
            }
            Err(e) => {
                self.rewind(Mark {
                    bytes: 0,
                    events: 0,
                });
                if let Err(trunc) = self.file.set_len(self.durable_len) {
                    tracing::error!(
                        "WAL {} could not be truncated after a failed write: {trunc}",
                        self.path.display()
                    );
                }
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compaction, phase one: write `events` to a temp file beside the log
    /// and fsync it. The live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[SheetEvent]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Compaction, phase two: rename the temp file over the log and reopen
    /// it. Must not run with frames still pending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            return Err(io::Error::other("WAL has unflushed frames"));
        }
        fs::rename(compact_tmp_path(&self.path), &self.path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.durable_len = self.file.metadata()?.len();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[SheetEvent]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every readable event, in order. Reading stops at the first truncated
    /// or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Vec<SheetEvent>> {
        Ok(Self::scan(path)?.0)
    }

    /// Readable events plus the byte length of the prefix holding them.
    fn scan(path: &Path) -> io::Result<(Vec<SheetEvent>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<SheetEvent>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += payload.len() as u64 + FRAME_OVERHEAD;
        }

        Ok((events, valid_len))
    }
}

fn compact_tmp_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

/// Next frame payload with a matching checksum, or `None` at end of log,
/// at a torn frame or at a checksum mismatch.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn row(cells: &[&str]) -> SheetEvent {
        SheetEvent::RowAppended {
            cells: cells.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let events = vec![
            SheetEvent::ColumnAdded {
                name: "Booking ID".into(),
            },
            row(&["BK12345601"]),
            SheetEvent::CellUpdated {
                row: 0,
                column: 0,
                value: "BK12345602".into(),
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = row(&["101", "Reserved"]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Partial length prefix plus a few bytes of a second entry
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = SheetEvent::ColumnAdded {
            name: "Notes".into(),
        };
        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        // One row whose status cell is rewritten many times
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&SheetEvent::ColumnAdded {
                name: "Booking Status".into(),
            })
            .unwrap();
            wal.append(&row(&["Reserved"])).unwrap();
            for i in 0..20 {
                let value = if i % 2 == 0 { "Checked-In" } else { "Reserved" };
                wal.append(&SheetEvent::CellUpdated {
                    row: 0,
                    column: 0,
                    value: value.into(),
                })
                .unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        let compacted = vec![
            SheetEvent::ColumnAdded {
                name: "Booking Status".into(),
            },
            row(&["Reserved"]),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let compacted = vec![SheetEvent::ColumnAdded {
            name: "Room Number".into(),
        }];
        let new_event = row(&["204"]);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![compacted[0].clone(), new_event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<SheetEvent> = (0..5).map(|i| row(&[&format!("{i}")])).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_cuts_torn_tail_before_appending() {
        let path = tmp_path("torn_tail_append.wal");
        let _ = fs::remove_file(&path);

        let first = row(&["101"]);
        let second = row(&["102"]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 5]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewind_drops_frames_after_mark() {
        let path = tmp_path("rewind.wal");
        let _ = fs::remove_file(&path);

        let kept = row(&["kept"]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_buffered(&kept).unwrap();
            let mark = wal.mark();
            wal.append_buffered(&row(&["dropped"])).unwrap();
            wal.append_buffered(&row(&["dropped too"])).unwrap();
            wal.rewind(mark);
            assert_eq!(wal.appends_since_compact(), 1);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);

        let _ = fs::remove_file(&path);
    }
}
