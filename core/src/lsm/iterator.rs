//! Merge iterator for combining multiple sorted sources.
//!
//! Used by scans and compaction to walk the memtable and SSTables as one
//! sorted stream.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::types::{Entry, Key};

/// A wrapper for entries that implements reverse ordering for the min-heap.
struct HeapEntry {
    entry: Entry,
    source_idx: usize,
}

impl Eq for HeapEntry {}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Entry order is (key asc, seq desc); reverse it for the max-heap.
        other.entry.cmp(&self.entry)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge iterator that combines multiple sorted iterators.
///
/// For duplicate keys, entries are returned in seq_num descending order
/// (newest first). A source error is yielded once and the source is then
/// treated as exhausted.
pub struct MergeIterator<I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<std::io::Error>,
    initialized: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, std::io::Error>>,
{
    /// Create a new merge iterator from multiple sources.
    pub fn new(sources: Vec<I>) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            pending_error: None,
            initialized: false,
        }
    }

    fn pull(&mut self, idx: usize) {
        match self.sources[idx].next() {
            Some(Ok(entry)) => self.heap.push(HeapEntry {
                entry,
                source_idx: idx,
            }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }

    fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        // Prime the heap with one entry from each source
        for idx in 0..self.sources.len() {
            self.pull(idx);
        }
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, std::io::Error>>,
{
    type Item = Result<Entry, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.initialize();

        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }

        let heap_entry = self.heap.pop()?;
        // Replenish from the same source
        self.pull(heap_entry.source_idx);
        Some(Ok(heap_entry.entry))
    }
}

/// Groups a sorted entry stream into `(key, versions)` with versions newest
/// first.
pub struct KeyVersionsIterator<I> {
    inner: I,
    peeked: Option<Entry>,
}

impl<I> KeyVersionsIterator<I>
where
    I: Iterator<Item = Result<Entry, std::io::Error>>,
{
    pub fn new(inner: I) -> Self {
        Self { inner, peeked: None }
    }
}

impl<I> Iterator for KeyVersionsIterator<I>
where
    I: Iterator<Item = Result<Entry, std::io::Error>>,
{
    type Item = Result<(Key, Vec<Entry>), std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.peeked.take() {
            Some(entry) => entry,
            None => match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            },
        };

        let key = first.key.clone();
        let mut versions = vec![first];
        loop {
            match self.inner.next() {
                Some(Ok(entry)) if entry.key == key => versions.push(entry),
                Some(Ok(entry)) => {
                    self.peeked = Some(entry);
                    break;
                }
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }

        Some(Ok((key, versions)))
    }
}
