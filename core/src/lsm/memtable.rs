//! In-memory sorted table for fast writes.
//!
//! The MemTable stores every version of a key, sorted by (key, seq_num desc)
//! in a BTreeMap. Merge operands live here as ordinary versions until a
//! flush collapses them.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::types::{Entry, EntryKind, Key, SeqNum};

/// Per-entry bookkeeping overhead added to the size estimate.
const ENTRY_OVERHEAD: usize = 8 + 16;

/// In-memory sorted table.
///
/// Entries are stored sorted by (key, reverse seq_num) so that:
/// - Keys are in ascending order
/// - For the same key, newer entries (higher seq_num) come first
pub struct MemTable {
    entries: BTreeMap<(Key, Reverse<SeqNum>), EntryKind>,
    /// Current size in bytes (approximate).
    size_bytes: usize,
    merge_operands: usize,
    /// Next sequence number to hand out.
    next_seq_num: SeqNum,
}

impl MemTable {
    /// Create a new empty memtable.
    pub fn new() -> Self {
        Self::with_seq_num(1)
    }

    /// Create a memtable starting from a specific sequence number.
    pub fn with_seq_num(start_seq_num: SeqNum) -> Self {
        Self {
            entries: BTreeMap::new(),
            size_bytes: 0,
            merge_operands: 0,
            next_seq_num: start_seq_num,
        }
    }

    /// Sequence number the next write will receive.
    pub fn current_seq_num(&self) -> SeqNum {
        self.next_seq_num
    }

    /// Insert an entry whose sequence number was already assigned, either by
    /// the writer from [`current_seq_num`](Self::current_seq_num) or by WAL
    /// replay.
    pub fn insert(&mut self, entry: Entry) {
        self.next_seq_num = self.next_seq_num.max(entry.seq_num + 1);
        let key_len = entry.key.len();
        self.size_bytes += key_len + entry.kind.approximate_size() + ENTRY_OVERHEAD;
        if entry.is_merge() {
            self.merge_operands += 1;
        }
        if let Some(old) = self.entries.insert((entry.key, Reverse(entry.seq_num)), entry.kind) {
            // Replay may hand us the same version twice.
            self.size_bytes -= key_len + old.approximate_size() + ENTRY_OVERHEAD;
            if matches!(old, EntryKind::Merge(_)) {
                self.merge_operands -= 1;
            }
        }
    }

    /// All versions of a key, newest first.
    pub fn versions<'a>(&'a self, key: &Key) -> impl Iterator<Item = (SeqNum, &'a EntryKind)> + 'a {
        let start = (key.clone(), Reverse(SeqNum::MAX));
        let end = (key.clone(), Reverse(0));

        self.entries
            .range(start..=end)
            .map(|((_, Reverse(seq)), kind)| (*seq, kind))
    }

    /// Iterate over all entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.iter().map(|((key, Reverse(seq)), kind)| Entry {
            key: key.clone(),
            seq_num: *seq,
            kind: kind.clone(),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of merge operands held.
    pub fn merge_operand_count(&self) -> usize {
        self.merge_operands
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
