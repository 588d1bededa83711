//! Core types for the LSM tree.

use std::cmp::Ordering;
use std::fmt;
use std::io::Write;

use crate::varint::{decode_varint, encode_varint, varint_len};

/// Sequence number for ordering entries with the same key.
/// Higher sequence numbers are newer.
pub type SeqNum = u64;

/// Key type - variable length bytes.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Key(pub Vec<u8>);

impl Key {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(data.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&[u8]> for Key {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Value type - variable length bytes. Also used for merge operands.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Value(pub Vec<u8>);

impl Value {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(data.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// What a single version of a key records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Materialized value. Shadows every older version.
    Put(Value),
    /// Pending merge operand, combined lazily with the versions below it.
    Merge(Value),
    /// Tombstone. Shadows every older version.
    Delete,
}

impl EntryKind {
    const TAG_PUT: u8 = 0;
    const TAG_DELETE: u8 = 1;
    const TAG_MERGE: u8 = 2;

    fn tag(&self) -> u8 {
        match self {
            EntryKind::Put(_) => Self::TAG_PUT,
            EntryKind::Delete => Self::TAG_DELETE,
            EntryKind::Merge(_) => Self::TAG_MERGE,
        }
    }

    /// The payload carried by a put or merge.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            EntryKind::Put(value) | EntryKind::Merge(value) => Some(value),
            EntryKind::Delete => None,
        }
    }

    /// Approximate in-memory footprint used for memtable accounting.
    pub(crate) fn approximate_size(&self) -> usize {
        self.payload().map_or(0, Value::len)
    }
}

/// An entry in the LSM tree: one version of one key.
#[derive(Clone, Debug)]
pub struct Entry {
    pub key: Key,
    pub seq_num: SeqNum,
    pub kind: EntryKind,
}

impl Entry {
    /// Create a new put entry.
    pub fn put(key: Key, seq_num: SeqNum, value: Value) -> Self {
        Self {
            key,
            seq_num,
            kind: EntryKind::Put(value),
        }
    }

    /// Create a new merge operand entry.
    pub fn merge(key: Key, seq_num: SeqNum, operand: Value) -> Self {
        Self {
            key,
            seq_num,
            kind: EntryKind::Merge(operand),
        }
    }

    /// Create a new delete entry (tombstone).
    pub fn delete(key: Key, seq_num: SeqNum) -> Self {
        Self {
            key,
            seq_num,
            kind: EntryKind::Delete,
        }
    }

    /// Returns true if this is a tombstone (delete marker).
    pub fn is_tombstone(&self) -> bool {
        matches!(self.kind, EntryKind::Delete)
    }

    /// Returns true if this is a pending merge operand.
    pub fn is_merge(&self) -> bool {
        matches!(self.kind, EntryKind::Merge(_))
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        // Format: key_len (varint) + key + seq_num (8) + tag (1) + [value_len (varint) + value]
        let mut size = varint_len(self.key.len() as u64) + self.key.len();
        size += 8; // seq_num
        size += 1; // tag
        if let Some(value) = self.kind.payload() {
            size += varint_len(value.len() as u64) + value.len();
        }
        size
    }

    /// Serialize entry to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, std::io::Error> {
        let mut written = 0;

        written += encode_varint(self.key.len() as u64, writer)?;
        writer.write_all(self.key.as_bytes())?;
        written += self.key.len();

        writer.write_all(&self.seq_num.to_le_bytes())?;
        written += 8;

        writer.write_all(&[self.kind.tag()])?;
        written += 1;

        if let Some(value) = self.kind.payload() {
            written += encode_varint(value.len() as u64, writer)?;
            writer.write_all(value.as_bytes())?;
            written += value.len();
        }

        Ok(written)
    }

    /// Deserialize entry from bytes. Returns the entry and the bytes consumed.
    pub fn read_from(data: &[u8]) -> Result<(Self, usize), std::io::Error> {
        let mut offset = 0;

        let (key_len, key_len_size) = decode_varint(data)?;
        offset += key_len_size;
        let key = Key::from_slice(take(data, offset, key_len as usize)?);
        offset += key_len as usize;

        let seq_num = u64::from_le_bytes(
            take(data, offset, 8)?
                .try_into()
                .map_err(|_| invalid_data("invalid seq_num"))?,
        );
        offset += 8;

        let tag = take(data, offset, 1)?[0];
        offset += 1;

        let kind = match tag {
            EntryKind::TAG_DELETE => EntryKind::Delete,
            EntryKind::TAG_PUT | EntryKind::TAG_MERGE => {
                let (value_len, value_len_size) = decode_varint(data.get(offset..).unwrap_or_default())?;
                offset += value_len_size;
                let value = Value::from_slice(take(data, offset, value_len as usize)?);
                offset += value_len as usize;
                if tag == EntryKind::TAG_PUT {
                    EntryKind::Put(value)
                } else {
                    EntryKind::Merge(value)
                }
            }
            other => return Err(invalid_data(&format!("invalid entry tag {}", other))),
        };

        Ok((Self { key, seq_num, kind }, offset))
    }
}

fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8], std::io::Error> {
    data.get(offset..offset + len).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "entry truncated")
    })
}

fn invalid_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Ordering for entries: first by key ascending, then by seq_num descending.
/// This ensures that for the same key, newer entries come first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => other.seq_num.cmp(&self.seq_num), // Descending seq_num
            ord => ord,
        }
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq_num == other.seq_num
    }
}
