// quarry-core/src/persistence/journal.rs
// Append-only file journal
//
// Record format:
// - payload_len: 4 bytes (u32 LE)
// - checksum:    4 bytes (CRC32 of payload, u32 LE)
// - payload:     JSON-encoded JournalEntry

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{ChangeRecord, PersistenceAdapter, ReplayState};
use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::index::IndexSpec;
use crate::{log_error, log_info, log_warn};

/// Header size: 4 (len) + 4 (crc)
pub const RECORD_HEADER_SIZE: usize = 8;

/// Maximum payload size: 64MB
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// One framed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub change: ChangeRecord,
}

impl JournalEntry {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(QuarryError::Persistence(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }
}

/// Result of reading a journal file front to back
#[derive(Debug, Default)]
struct ScanOutcome {
    entries: Vec<JournalEntry>,
    /// Byte offset just past the last complete record
    valid_len: u64,
    torn_tail: bool,
}

fn read_entries<R: Read>(reader: R) -> Result<ScanOutcome> {
    let mut reader = reader;
    let mut outcome = ScanOutcome::default();

    loop {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut reader, &mut header)? {
            0 => break,
            n if n < RECORD_HEADER_SIZE => {
                outcome.torn_tail = true;
                break;
            }
            _ => {}
        }

        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_RECORD_SIZE {
            return Err(QuarryError::Corruption(format!(
                "record at offset {} claims {} bytes",
                outcome.valid_len, len
            )));
        }

        let mut payload = vec![0u8; len];
        if read_full(&mut reader, &mut payload)? < len {
            outcome.torn_tail = true;
            break;
        }
        if crc32fast::hash(&payload) != checksum {
            return Err(QuarryError::Corruption(format!(
                "checksum mismatch in record at offset {}",
                outcome.valid_len
            )));
        }

        let entry: JournalEntry = serde_json::from_slice(&payload).map_err(|e| {
            QuarryError::Corruption(format!(
                "undecodable record at offset {}: {}",
                outcome.valid_len, e
            ))
        })?;
        outcome.entries.push(entry);
        outcome.valid_len += (RECORD_HEADER_SIZE + len) as u64;
    }

    Ok(outcome)
}

/// `read_exact` that reports how many bytes were available instead of failing at EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(QuarryError::Io(e)),
        }
    }
    Ok(filled)
}

/// Seekable sink a journal frame is appended to
trait JournalFile: Write + Seek {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl JournalFile for File {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Write one frame at `at` (the current end of the log).
///
/// A failed or partial write is cut back to `at`, so the next append never
/// lands behind a torn frame.
fn append_frame<F: JournalFile>(file: &mut F, at: u64, frame: &[u8]) -> std::io::Result<()> {
    let written = file.write_all(frame).and_then(|_| file.flush());
    if let Err(e) = written {
        let rollback = file
            .truncate_to(at)
            .and_then(|_| file.seek(SeekFrom::Start(at)).map(|_| ()));
        if let Err(rollback_err) = rollback {
            log_error!("Journal rollback to {} bytes failed: {}", at, rollback_err);
        }
        return Err(e);
    }
    Ok(())
}

/// File-backed change log.
///
/// A torn final record (crash mid-append) is dropped with a warning and
/// truncated away on open; a checksum mismatch anywhere is `Corruption`.
/// The file is decoded once on open; the replayed state is kept current by
/// every append and serves `load_all`, `load_indexes` and `last_auto_id`.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
}

#[derive(Debug)]
struct JournalWriter {
    file: File,
    /// Bytes of complete records
    len: u64,
    next_sequence: u64,
    replay: ReplayState,
}

impl FileJournal {
    /// Open (or create) the journal at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        file.seek(SeekFrom::Start(0))?;
        let outcome = read_entries(BufReader::new(&mut file))?;
        if outcome.torn_tail {
            log_warn!(
                "Journal {:?} has a torn tail; truncating to {} bytes",
                path,
                outcome.valid_len
            );
            file.set_len(outcome.valid_len)?;
        }
        file.seek(SeekFrom::Start(outcome.valid_len))?;

        let next_sequence = outcome.entries.last().map_or(1, |e| e.sequence + 1);
        let replay = ReplayState::replay(outcome.entries.iter().map(|e| &e.change));
        log_info!(
            "Opened journal {:?} with {} record(s)",
            path,
            outcome.entries.len()
        );

        Ok(FileJournal {
            path,
            writer: Mutex::new(JournalWriter {
                file,
                len: outcome.valid_len,
                next_sequence,
                replay,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All complete records currently in the file
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        // Hold the writer lock so no append interleaves with the read
        let _writer = self.writer.lock();
        let file = File::open(&self.path)?;
        let outcome = read_entries(BufReader::new(file))?;
        if outcome.torn_tail {
            log_warn!("Ignoring torn tail of journal {:?}", self.path);
        }
        Ok(outcome.entries)
    }

}

impl PersistenceAdapter for FileJournal {
    fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.writer.lock().replay.documents())
    }

    fn load_indexes(&self) -> Result<Vec<IndexSpec>> {
        Ok(self.writer.lock().replay.indexes())
    }

    fn last_auto_id(&self) -> Result<i64> {
        Ok(self.writer.lock().replay.last_auto_id())
    }

    fn append_change(&self, change: &ChangeRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        let writer = &mut *writer;
        let entry = JournalEntry {
            sequence: writer.next_sequence,
            recorded_at: Utc::now(),
            change: change.clone(),
        };
        let bytes = entry.encode()?;
        append_frame(&mut writer.file, writer.len, &bytes)
            .map_err(|e| QuarryError::Persistence(format!("journal append failed: {}", e)))?;
        writer.len += bytes.len() as u64;
        writer.next_sequence += 1;
        writer.replay.apply(change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use std::io::Cursor;

    fn entry(sequence: u64) -> JournalEntry {
        JournalEntry {
            sequence,
            recorded_at: Utc::now(),
            change: ChangeRecord::Delete {
                id: DocumentId::Int(sequence as i64),
            },
        }
    }

    #[test]
    fn test_read_entries() {
        let mut data = Vec::new();
        data.extend_from_slice(&entry(1).encode().unwrap());
        data.extend_from_slice(&entry(2).encode().unwrap());

        let outcome = read_entries(Cursor::new(data.clone())).unwrap();
        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(outcome.entries[1].sequence, 2);
        assert_eq!(outcome.valid_len, data.len() as u64);
        assert!(!outcome.torn_tail);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let first = entry(1).encode().unwrap();
        let second = entry(2).encode().unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second[..second.len() - 3]);

        let outcome = read_entries(Cursor::new(data)).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.torn_tail);
        assert_eq!(outcome.valid_len, first.len() as u64);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let mut data = entry(1).encode().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(
            read_entries(Cursor::new(data)),
            Err(QuarryError::Corruption(_))
        ));
    }

    /// In-memory journal file whose writes fail once `budget` bytes are used
    struct FlakyFile {
        data: Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(ErrorKind::Other, "no space left"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.data.write(&buf[..n])
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyFile {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl JournalFile for FlakyFile {
        fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_torn_frame() {
        let mut file = FlakyFile {
            data: Cursor::new(Vec::new()),
            budget: usize::MAX,
        };
        let first = entry(1).encode().unwrap();
        append_frame(&mut file, 0, &first).unwrap();

        // Second append dies five bytes in
        file.budget = 5;
        let second = entry(2).encode().unwrap();
        assert!(append_frame(&mut file, first.len() as u64, &second).is_err());
        assert_eq!(file.data.get_ref().len(), first.len());

        file.budget = usize::MAX;
        let third = entry(3).encode().unwrap();
        append_frame(&mut file, first.len() as u64, &third).unwrap();

        let outcome = read_entries(Cursor::new(file.data.into_inner())).unwrap();
        let sequences: Vec<u64> = outcome.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert!(!outcome.torn_tail);
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let mut data = Vec::new();
        data.extend_from_slice(&(u32::MAX).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            read_entries(Cursor::new(data)),
            Err(QuarryError::Corruption(_))
        ));
    }
}
