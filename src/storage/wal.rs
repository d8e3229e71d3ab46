//! Mutation journal
//!
//! When persistence is enabled, every store mutation is appended here before it is
//! applied in memory. Opening a store replays the journal to rebuild its series.
//!
//! Record framing:
//! - length: u32 LE (4 bytes)
//! - data: [u8; length] (bincode `JournalRecord`)
//! - crc: u32 LE (4 bytes, CRC32 of length + data)
//!
//! A failed append is cut back out of the file, so replay never sees a record
//! whose mutation was refused. A damaged tail found at open is truncated away
//! before new records are appended behind it.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Point, Timestamp, ValueType};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest accepted record body. Blob values make records variable sized.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Bytes written before a batched sync is forced
const SYNC_THRESHOLD: usize = 64 * 1024;

/// Sync strategy for journal appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSync {
    /// Fsync after every record
    EveryWrite,
    /// Fsync once enough bytes accumulate
    #[default]
    Batched,
    /// Flush to the OS only
    None,
}

impl JournalSync {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "every_write" | "always" => Some(Self::EveryWrite),
            "batched" | "batch" => Some(Self::Batched),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

/// One applied store mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    Create { id: String, value_type: ValueType },
    /// `point.time` is the resolved timestamp, never the sentinel
    Insert { id: String, point: Point },
    DeleteOldest { id: String, count: usize },
    DeleteBefore { id: String, time: Timestamp },
}

impl JournalRecord {
    pub fn series_id(&self) -> &str {
        match self {
            JournalRecord::Create { id, .. }
            | JournalRecord::Insert { id, .. }
            | JournalRecord::DeleteOldest { id, .. }
            | JournalRecord::DeleteBefore { id, .. } => id,
        }
    }
}

/// Append-only journal file
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    entry_count: u64,
    /// Logical length covering every successfully appended record
    committed_len: u64,
    bytes_since_sync: usize,
    sync_mode: JournalSync,
    /// Set when a failed append could not be rolled back
    failed: bool,
    #[cfg(test)]
    inject: Option<InjectedFailure>,
}

/// Write failure simulated by the next append
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectedFailure {
    /// Half the frame reaches the buffer only
    Buffered,
    /// Half the frame reaches the file
    Flushed,
}

impl Journal {
    /// Open or create a journal file, returning it with the records it already holds
    pub fn open(
        path: impl AsRef<Path>,
        sync_mode: JournalSync,
    ) -> StorageResult<(Self, Vec<JournalRecord>)> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (records, valid_len) = if path.exists() {
            Self::read_all(&path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "Truncating journal {} from {} to {} bytes",
                path.display(),
                file_len,
                valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let journal = Self {
            writer: BufWriter::new(file),
            path,
            entry_count: records.len() as u64,
            committed_len: valid_len,
            bytes_since_sync: 0,
            sync_mode,
            failed: false,
            #[cfg(test)]
            inject: None,
        };
        Ok((journal, records))
    }

    /// Append a record and sync according to the configured mode.
    ///
    /// On error the journal is left as it was before the call.
    pub fn append(&mut self, record: &JournalRecord) -> StorageResult<()> {
        if self.failed {
            return Err(StorageError::Journal(format!(
                "journal {} is unusable after a failed rollback",
                self.path.display()
            )));
        }

        let frame = Self::encode(record)?;
        if let Err(e) = self.write_frame(&frame) {
            match self.rollback() {
                Ok(()) => tracing::warn!(
                    "Rolled back failed append to journal {}: {}",
                    self.path.display(),
                    e
                ),
                Err(rollback) => {
                    tracing::error!(
                        "Journal {} append failed ({}) and rollback failed: {}",
                        self.path.display(),
                        e,
                        rollback
                    );
                    self.failed = true;
                }
            }
            return Err(e);
        }

        self.committed_len += frame.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> StorageResult<()> {
        #[cfg(test)]
        if let Some(failure) = self.inject.take() {
            self.writer.write_all(&frame[..frame.len() / 2])?;
            if failure == InjectedFailure::Flushed {
                self.writer.flush()?;
            }
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure").into());
        }

        self.writer.write_all(frame)?;
        self.bytes_since_sync += frame.len();

        match self.sync_mode {
            JournalSync::EveryWrite => self.sync(),
            JournalSync::Batched if self.bytes_since_sync >= SYNC_THRESHOLD => self.sync(),
            JournalSync::Batched => Ok(()),
            JournalSync::None => Ok(self.writer.flush()?),
        }
    }

    /// Cut the file back to `committed_len`, keeping earlier records that were
    /// still buffered
    fn rollback(&mut self) -> StorageResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_, buffered) = stale.into_parts();
        let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());

        let on_disk = self.writer.get_ref().metadata()?.len();
        let pending = (self.committed_len.saturating_sub(on_disk) as usize).min(buffered.len());
        self.writer.get_ref().set_len(on_disk.min(self.committed_len))?;
        self.writer.write_all(&buffered[..pending])?;
        self.sync()
    }

    /// Force buffered records to disk
    pub fn sync(&mut self) -> StorageResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Replace the journal contents with `records`.
    ///
    /// The new file is written beside the old one and renamed over it, so a crash
    /// mid-compaction leaves the previous journal intact.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> StorageResult<()> {
        self.sync()?;

        let tmp_path = self.path.with_extension("compact");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                writer.write_all(&Self::encode(record)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.entry_count = records.len() as u64;
        self.bytes_since_sync = 0;

        tracing::info!(
            "Compacted journal {} to {} records",
            self.path.display(),
            records.len()
        );
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> StorageResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Frame one record; nothing is written yet
    fn encode(record: &JournalRecord) -> StorageResult<Vec<u8>> {
        let data = bincode::serialize(record)?;
        if data.len() > MAX_RECORD_LEN {
            return Err(StorageError::Journal(format!(
                "Record too large: {} bytes",
                data.len()
            )));
        }
        let len_bytes = (data.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(&data);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(8 + data.len());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Read every intact record and the byte length they span. Replay stops at
    /// the first damaged one.
    fn read_all(path: &Path) -> StorageResult<(Vec<JournalRecord>, u64)> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match Self::read_record(&mut reader) {
                Ok(Some((record, len))) => {
                    records.push(record);
                    valid_len += len as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "Journal {} replay stopped at record {}: {}",
                        path.display(),
                        records.len(),
                        e
                    );
                    break;
                }
            }
        }

        Ok((records, valid_len))
    }

    /// Next record and its framed length
    fn read_record<R: Read>(reader: &mut R) -> StorageResult<Option<(JournalRecord, usize)>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_RECORD_LEN {
            return Err(StorageError::Corruption(format!(
                "Record length too large: {}",
                len
            )));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(StorageError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(Some((bincode::deserialize(&data)?, 8 + len)))
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("Failed to flush journal {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::Value;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    fn insert(id: &str, time: Timestamp, v: f64) -> JournalRecord {
        JournalRecord::Insert {
            id: id.to_string(),
            point: Point::new(time, Value::Float(v)),
        }
    }

    #[test]
    fn test_journal_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.journal");

        {
            let (mut journal, existing) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
            assert!(existing.is_empty());
            journal
                .append(&JournalRecord::Create {
                    id: "temp".into(),
                    value_type: ValueType::Float,
                })
                .unwrap();
            journal.append(&insert("temp", 10, 1.5)).unwrap();
            journal
                .append(&JournalRecord::DeleteBefore {
                    id: "temp".into(),
                    time: 5,
                })
                .unwrap();
            assert_eq!(journal.entry_count(), 3);
        }

        let (journal, records) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
        assert_eq!(journal.entry_count(), 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], insert("temp", 10, 1.5));
        assert_eq!(records[2].series_id(), "temp");
    }

    #[test]
    fn test_journal_corrupt_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.journal");

        {
            let (mut journal, _) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
            journal.append(&insert("a", 1, 1.0)).unwrap();
            journal.append(&insert("a", 2, 2.0)).unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(len - 6)).unwrap();
            file.write_all(&[0xFF, 0xFF]).unwrap();
        }

        let (mut journal, records) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
        assert_eq!(records, vec![insert("a", 1, 1.0)]);

        // New records land after the intact prefix, not behind the damage
        journal.append(&insert("a", 3, 3.0)).unwrap();
        drop(journal);
        let (_, records) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
        assert_eq!(records, vec![insert("a", 1, 1.0), insert("a", 3, 3.0)]);
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        for (sync, failure) in [
            (JournalSync::EveryWrite, InjectedFailure::Flushed),
            (JournalSync::Batched, InjectedFailure::Buffered),
            (JournalSync::Batched, InjectedFailure::Flushed),
        ] {
            let dir = tempdir().unwrap();
            let path = dir.path().join("series.journal");

            {
                let (mut journal, _) = Journal::open(&path, sync).unwrap();
                journal.append(&insert("a", 1, 1.0)).unwrap();
                journal.append(&insert("a", 2, 2.0)).unwrap();

                journal.inject = Some(failure);
                assert!(journal.append(&insert("a", 3, 3.0)).is_err());
                assert_eq!(journal.entry_count(), 2);

                journal.append(&insert("a", 4, 4.0)).unwrap();
            }

            let (journal, records) = Journal::open(&path, sync).unwrap();
            assert_eq!(
                records,
                vec![insert("a", 1, 1.0), insert("a", 2, 2.0), insert("a", 4, 4.0)],
                "{:?} / {:?}",
                sync,
                failure
            );
            assert_eq!(journal.file_size().unwrap(), journal.committed_len);
        }
    }

    #[test]
    fn test_failed_journal_refuses_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.journal");

        let (mut journal, _) = Journal::open(&path, JournalSync::EveryWrite).unwrap();
        journal.failed = true;
        let err = journal.append(&insert("a", 1, 1.0)).unwrap_err();
        assert!(matches!(err, StorageError::Journal(_)));
        assert_eq!(journal.file_size().unwrap(), 0);
    }

    #[test]
    fn test_journal_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.journal");

        let (mut journal, _) = Journal::open(&path, JournalSync::Batched).unwrap();
        for i in 1..=50 {
            journal.append(&insert("a", i, i as f64)).unwrap();
        }
        journal.rewrite(&[insert("a", 50, 50.0)]).unwrap();
        assert_eq!(journal.entry_count(), 1);
        journal.append(&insert("a", 51, 51.0)).unwrap();
        drop(journal);

        let (_, records) = Journal::open(&path, JournalSync::Batched).unwrap();
        assert_eq!(records, vec![insert("a", 50, 50.0), insert("a", 51, 51.0)]);
        assert!(!path.with_extension("compact").exists());
    }

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!(JournalSync::from_str("every-write"), Some(JournalSync::EveryWrite));
        assert_eq!(JournalSync::from_str("none"), Some(JournalSync::None));
        assert_eq!(JournalSync::from_str("sometimes"), None);
    }
}
