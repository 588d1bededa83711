//! SSTable (Sorted String Table) - immutable on-disk sorted files.
//!
//! File layout:
//! - Data: serialized entries, sorted by (key, seq_num desc)
//! - Index: (key, offset) of every `SSTABLE_INDEX_INTERVAL`-th entry
//! - Meta: min and max key
//! - Footer: index offset, meta offset, entry count, min/max seq, magic
//!
//! Tables are written to a temporary file and renamed into place once
//! complete, so a crash never leaves a half-written table under its final
//! name.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::constants::{SSTABLE_FILE_NUM_DIGITS, SSTABLE_FOOTER_SIZE, SSTABLE_INDEX_INTERVAL, SSTABLE_MAGIC};
use crate::varint::{decode_varint, encode_varint};

use super::types::{Entry, Key, SeqNum};

/// Metadata for an SSTable, stored in its footer and meta block.
#[derive(Clone, Debug)]
pub struct SSTableMeta {
    /// Unique identifier for this SSTable.
    pub id: u64,
    /// Number of entries in the table.
    pub entry_count: u64,
    /// Minimum key in the table.
    pub min_key: Key,
    /// Maximum key in the table.
    pub max_key: Key,
    /// Minimum sequence number.
    pub min_seq: SeqNum,
    /// Maximum sequence number.
    pub max_seq: SeqNum,
}

#[derive(Clone, Debug)]
struct IndexEntry {
    key: Key,
    offset: u64,
}

pub(crate) fn sstable_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:0width$}.sst", id, width = SSTABLE_FILE_NUM_DIGITS))
}

fn corrupted(id: u64, what: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("SSTable {}: {}", id, what),
    )
}

/// Writer for creating an SSTable. Entries must arrive in sorted order.
pub struct SSTableWriter {
    id: u64,
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    index: Vec<IndexEntry>,
    entry_count: u64,
    min_key: Option<Key>,
    max_key: Option<Key>,
    min_seq: SeqNum,
    max_seq: SeqNum,
}

impl SSTableWriter {
    /// Create a new SSTable writer for table `id` inside `dir`.
    pub fn new(dir: &Path, id: u64) -> Result<Self, std::io::Error> {
        let path = sstable_path(dir, id);
        let tmp_path = path.with_extension("sst.tmp");
        let file = File::create(&tmp_path)?;

        Ok(Self {
            id,
            path,
            tmp_path,
            writer: BufWriter::new(file),
            offset: 0,
            index: Vec::new(),
            entry_count: 0,
            min_key: None,
            max_key: None,
            min_seq: SeqNum::MAX,
            max_seq: 0,
        })
    }

    /// Write an entry to the SSTable.
    pub fn write_entry(&mut self, entry: &Entry) -> Result<(), std::io::Error> {
        if self.entry_count as usize % SSTABLE_INDEX_INTERVAL == 0 {
            self.index.push(IndexEntry {
                key: entry.key.clone(),
                offset: self.offset,
            });
        }

        self.offset += entry.write_to(&mut self.writer)? as u64;

        self.entry_count += 1;
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.max_key = Some(entry.key.clone());
        self.min_seq = self.min_seq.min(entry.seq_num);
        self.max_seq = self.max_seq.max(entry.seq_num);

        Ok(())
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Discard the table without publishing it.
    pub fn abandon(self) -> Result<(), std::io::Error> {
        drop(self.writer);
        std::fs::remove_file(&self.tmp_path)
    }

    /// Write index, meta and footer, then move the file into place. The
    /// temporary file is removed if that fails.
    pub fn finish(mut self) -> Result<SSTableMeta, std::io::Error> {
        let tmp_path = self.tmp_path.clone();
        self.write_tail().inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp_path);
        })
    }

    fn write_tail(&mut self) -> Result<SSTableMeta, std::io::Error> {
        let meta = SSTableMeta {
            id: self.id,
            entry_count: self.entry_count,
            min_key: self.min_key.take().unwrap_or_else(|| Key::new(vec![])),
            max_key: self.max_key.take().unwrap_or_else(|| Key::new(vec![])),
            min_seq: if self.min_seq == SeqNum::MAX { 0 } else { self.min_seq },
            max_seq: self.max_seq,
        };

        let index_offset = self.offset;
        let mut block = Vec::new();
        for entry in &self.index {
            encode_varint(entry.key.len() as u64, &mut block)?;
            block.extend_from_slice(entry.key.as_bytes());
            block.extend_from_slice(&entry.offset.to_le_bytes());
        }
        self.writer.write_all(&block)?;

        let meta_offset = index_offset + block.len() as u64;
        block.clear();
        for key in [&meta.min_key, &meta.max_key] {
            encode_varint(key.len() as u64, &mut block)?;
            block.extend_from_slice(key.as_bytes());
        }
        self.writer.write_all(&block)?;

        for field in [index_offset, meta_offset, meta.entry_count, meta.min_seq, meta.max_seq, SSTABLE_MAGIC] {
            self.writer.write_all(&field.to_le_bytes())?;
        }

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        std::fs::rename(&self.tmp_path, &self.path)?;

        Ok(meta)
    }
}

/// Reader for an SSTable. Holds the sparse index in memory.
pub struct SSTableReader {
    file: File,
    path: PathBuf,
    index: Vec<IndexEntry>,
    data_end: u64,
    pub meta: SSTableMeta,
}

impl SSTableReader {
    /// Open an existing SSTable.
    pub fn open(dir: &Path, id: u64) -> Result<Self, std::io::Error> {
        let path = sstable_path(dir, id);
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < SSTABLE_FOOTER_SIZE as u64 {
            return Err(corrupted(id, "file shorter than footer"));
        }

        let mut footer = [0u8; SSTABLE_FOOTER_SIZE];
        file.read_exact_at(&mut footer, len - SSTABLE_FOOTER_SIZE as u64)?;
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&footer[i * 8..i * 8 + 8]);
            u64::from_le_bytes(buf)
        };
        let (index_offset, meta_offset, entry_count, min_seq, max_seq, magic) =
            (field(0), field(1), field(2), field(3), field(4), field(5));

        let footer_offset = len - SSTABLE_FOOTER_SIZE as u64;
        if magic != SSTABLE_MAGIC {
            return Err(corrupted(id, "bad magic"));
        }
        if index_offset > meta_offset || meta_offset > footer_offset {
            return Err(corrupted(id, "bad block offsets"));
        }

        let mut blocks = vec![0u8; (footer_offset - index_offset) as usize];
        file.read_exact_at(&mut blocks, index_offset)?;
        let (index_block, meta_block) = blocks.split_at((meta_offset - index_offset) as usize);

        let mut index = Vec::new();
        let mut pos = 0;
        while pos < index_block.len() {
            let (key, used) = read_key(&index_block[pos..]).ok_or_else(|| corrupted(id, "bad index"))?;
            pos += used;
            let offset = index_block
                .get(pos..pos + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .ok_or_else(|| corrupted(id, "bad index"))?;
            pos += 8;
            // Blocks are read as [offset, next offset), so offsets must grow
            // and stay inside the data section.
            let prev = index.last().map_or(0, |e: &IndexEntry| e.offset);
            if offset < prev || offset > index_offset {
                return Err(corrupted(id, "bad index"));
            }
            index.push(IndexEntry { key, offset });
        }

        let (min_key, used) = read_key(meta_block).ok_or_else(|| corrupted(id, "bad meta"))?;
        let (max_key, _) = read_key(&meta_block[used..]).ok_or_else(|| corrupted(id, "bad meta"))?;

        Ok(Self {
            file,
            path,
            index,
            data_end: index_offset,
            meta: SSTableMeta {
                id,
                entry_count,
                min_key,
                max_key,
                min_seq,
                max_seq,
            },
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a key might be in this SSTable (based on key range).
    pub fn might_contain(&self, key: &Key) -> bool {
        self.meta.entry_count > 0 && key >= &self.meta.min_key && key <= &self.meta.max_key
    }

    /// All versions of a key in this table, newest first.
    pub fn get(&self, key: &Key) -> Result<Vec<Entry>, std::io::Error> {
        if !self.might_contain(key) {
            return Ok(vec![]);
        }

        // Versions of a key can start in the block before the first block
        // whose first key is >= the key.
        let first = self.index.partition_point(|e| &e.key < key).saturating_sub(1);

        let mut results = Vec::new();
        for block in first..self.index.len() {
            if &self.index[block].key > key {
                break;
            }
            for entry in self.read_block(block)? {
                match entry.key.cmp(key) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => results.push(entry),
                    std::cmp::Ordering::Greater => return Ok(results),
                }
            }
        }

        Ok(results)
    }

    /// Iterate over all entries in sorted order.
    pub fn iter(&self) -> SSTableIterator<'_> {
        SSTableIterator {
            reader: self,
            next_block: 0,
            buffered: Vec::new().into_iter(),
        }
    }

    fn read_block(&self, block: usize) -> Result<Vec<Entry>, std::io::Error> {
        let start = self.index[block].offset;
        let end = self
            .index
            .get(block + 1)
            .map_or(self.data_end, |next| next.offset);

        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact_at(&mut buf, start)?;

        let mut entries = Vec::with_capacity(SSTABLE_INDEX_INTERVAL);
        let mut pos = 0;
        while pos < buf.len() {
            let (entry, used) = Entry::read_from(&buf[pos..])?;
            pos += used;
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn read_key(bytes: &[u8]) -> Option<(Key, usize)> {
    let (len, used) = decode_varint(bytes).ok()?;
    let key = bytes.get(used..used + len as usize)?;
    Some((Key::from_slice(key), used + len as usize))
}

/// Iterator over SSTable entries, one index block at a time.
pub struct SSTableIterator<'a> {
    reader: &'a SSTableReader,
    next_block: usize,
    buffered: std::vec::IntoIter<Entry>,
}

impl Iterator for SSTableIterator<'_> {
    type Item = Result<Entry, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffered.next() {
                return Some(Ok(entry));
            }
            if self.next_block >= self.reader.index.len() {
                return None;
            }

            let block = self.next_block;
            self.next_block += 1;
            match self.reader.read_block(block) {
                Ok(entries) => self.buffered = entries.into_iter(),
                Err(e) => {
                    // Stop after reporting the error.
                    self.next_block = self.reader.index.len();
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::Value;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn get_temp_dir() -> PathBuf {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let dir = PathBuf::from(format!("/tmp/mergedb_sstable_test_{}", since_epoch.as_nanos()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_table(dir: &Path, id: u64, entries: &[Entry]) -> SSTableMeta {
        let mut writer = SSTableWriter::new(dir, id).unwrap();
        for entry in entries {
            writer.write_entry(entry).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_sstable_write_and_read() {
        let dir = get_temp_dir();

        let entries = vec![
            Entry::put(Key::from("apple"), 1, Value::from("red")),
            Entry::merge(Key::from("banana"), 2, Value::from("5")),
            Entry::delete(Key::from("cherry"), 3),
        ];
        let meta = write_table(&dir, 1, &entries);
        assert_eq!(meta.entry_count, 3);

        let reader = SSTableReader::open(&dir, 1).unwrap();
        assert_eq!(reader.meta.entry_count, 3);
        assert_eq!(reader.meta.min_key, Key::from("apple"));
        assert_eq!(reader.meta.max_key, Key::from("cherry"));
        assert_eq!(reader.meta.max_seq, 3);

        let results = reader.get(&Key::from("banana")).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_merge());
        assert!(reader.get(&Key::from("blueberry")).unwrap().is_empty());

        let all: Vec<_> = reader.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(all, entries);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_versions_spanning_index_blocks() {
        let dir = get_temp_dir();

        // Three keys, the middle one with enough versions to cross several
        // index blocks.
        let mut entries = vec![Entry::put(Key::from("a"), 1, Value::from("x"))];
        let versions = SSTABLE_INDEX_INTERVAL as u64 * 3 + 5;
        for seq in (10..10 + versions).rev() {
            entries.push(Entry::merge(Key::from("m"), seq, Value::from("1")));
        }
        entries.push(Entry::put(Key::from("z"), 2, Value::from("y")));
        write_table(&dir, 7, &entries);

        let reader = SSTableReader::open(&dir, 7).unwrap();
        let results = reader.get(&Key::from("m")).unwrap();
        assert_eq!(results.len() as u64, versions);
        assert!(results.windows(2).all(|w| w[0].seq_num > w[1].seq_num));
        assert_eq!(reader.get(&Key::from("z")).unwrap().len(), 1);
        assert_eq!(reader.iter().count(), entries.len());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_bad_index_offsets_are_rejected() {
        let dir = get_temp_dir();
        let entries: Vec<_> = (0..SSTABLE_INDEX_INTERVAL as u64 * 2)
            .map(|i| Entry::put(Key::from(format!("key{:03}", i).as_str()), i + 1, Value::from("v")))
            .collect();
        write_table(&dir, 4, &entries);

        let path = sstable_path(&dir, 4);
        let original = std::fs::read(&path).unwrap();
        let footer = original.len() - SSTABLE_FOOTER_SIZE;
        let index_offset = u64::from_le_bytes(original[footer..footer + 8].try_into().unwrap());
        // First index entry: 1-byte key length, 6-byte key, then the offset.
        let first_offset = index_offset as usize + 1 + 6;

        // Offset past the first block's successor.
        let mut bytes = original.clone();
        bytes[first_offset..first_offset + 8].copy_from_slice(&index_offset.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let err = SSTableReader::open(&dir, 4).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        // Offset beyond the data section.
        let mut bytes = original.clone();
        bytes[first_offset..first_offset + 8].copy_from_slice(&(index_offset + 1).to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let err = SSTableReader::open(&dir, 4).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = get_temp_dir();
        write_table(&dir, 3, &[Entry::put(Key::from("k"), 1, Value::from("v"))]);

        let path = sstable_path(&dir, 3);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = SSTableReader::open(&dir, 3).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let _ = std::fs::remove_dir_all(dir);
    }
}
