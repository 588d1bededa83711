//! Write-Ahead Log (WAL) for durability.
//!
//! All writes are logged to the WAL before being applied to the memtable.
//! On crash recovery, the WAL is replayed to restore the memtable state.
//! Merge operands are logged as-is; they are never validated on the write
//! path.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::types::{Entry, EntryKind, Key, Value};

/// Write-ahead log for durability.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Length of the log up to the last complete record.
    len: u64,
    sync_on_append: bool,
}

/// WAL entry type markers.
const WAL_PUT: u8 = 1;
const WAL_DELETE: u8 = 2;
const WAL_MERGE: u8 = 3;

impl Wal {
    /// Create or open a WAL file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let file = Self::open_file(path.as_ref())?;
        let len = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
            len,
            sync_on_append: false,
        })
    }

    /// fsync after every record before `append` returns.
    pub fn sync_on_append(mut self, enabled: bool) -> Self {
        self.sync_on_append = enabled;
        self
    }

    fn open_file(path: &Path) -> Result<File, std::io::Error> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Log one write. A record that fails to reach the file is cut off again,
    /// so a failed write never shows up on replay.
    pub fn append(&mut self, entry: &Entry) -> Result<(), std::io::Error> {
        let record = encode_record(entry);

        let written = self
            .writer
            .write_all(&record)
            .and_then(|_| self.writer.flush())
            .and_then(|_| {
                if self.sync_on_append {
                    self.writer.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });

        match written {
            Ok(()) => {
                self.len += record.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(error = %rollback, wal = %self.path.display(), "failed to roll back WAL record");
                }
                Err(e)
            }
        }
    }

    /// Truncate to the last complete record and start over with an empty
    /// buffer.
    fn rollback(&mut self) -> Result<(), std::io::Error> {
        let file = Self::open_file(&self.path)?;
        file.set_len(self.len)?;
        let failed = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Drop the buffered bytes instead of flushing them.
        let _ = failed.into_parts();
        Ok(())
    }

    /// Sync the WAL to disk.
    pub fn sync(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop every logged record. Called once the memtable contents are safely
    /// in an SSTable.
    pub fn reset(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(0)?;
        self.len = 0;
        self.writer.get_ref().sync_all()
    }

    /// Get the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Format: type (1) + seq_num (8) + key_len (4) + key [+ value_len (4) + value]
fn encode_record(entry: &Entry) -> Vec<u8> {
    let (tag, payload) = match &entry.kind {
        EntryKind::Put(value) => (WAL_PUT, Some(value)),
        EntryKind::Merge(operand) => (WAL_MERGE, Some(operand)),
        EntryKind::Delete => (WAL_DELETE, None),
    };

    let mut record = Vec::with_capacity(1 + 8 + 4 + entry.key.len() + payload.map_or(0, |v| 4 + v.len()));
    record.push(tag);
    record.extend_from_slice(&entry.seq_num.to_le_bytes());
    record.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
    record.extend_from_slice(entry.key.as_bytes());
    if let Some(value) = payload {
        record.extend_from_slice(&(value.len() as u32).to_le_bytes());
        record.extend_from_slice(value.as_bytes());
    }
    record
}

/// WAL reader for recovery.
pub struct WalReader {
    reader: BufReader<File>,
}

impl WalReader {
    /// Open a WAL file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }

    /// Read all entries from the WAL. A record cut short by a crash ends the
    /// log.
    pub fn read_all(&mut self) -> Result<Vec<Entry>, std::io::Error> {
        let mut entries = Vec::new();

        loop {
            match self.read_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("WAL ends in a partial record after {} entries", entries.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }

    fn read_entry(&mut self) -> Result<Option<Entry>, std::io::Error> {
        let mut type_buf = [0u8; 1];
        match self.reader.read_exact(&mut type_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let mut seq_buf = [0u8; 8];
        self.reader.read_exact(&mut seq_buf)?;
        let seq_num = u64::from_le_bytes(seq_buf);

        let key = Key::new(self.read_chunk()?);

        match type_buf[0] {
            WAL_PUT => Ok(Some(Entry::put(key, seq_num, Value::new(self.read_chunk()?)))),
            WAL_MERGE => Ok(Some(Entry::merge(key, seq_num, Value::new(self.read_chunk()?)))),
            WAL_DELETE => Ok(Some(Entry::delete(key, seq_num))),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid WAL entry type",
            )),
        }
    }

    /// Read a u32 length prefix followed by that many bytes.
    fn read_chunk(&mut self) -> Result<Vec<u8>, std::io::Error> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}
