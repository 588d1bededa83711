//! LSM Tree key-value store with merge operator support.
//!
//! Architecture:
//! - MemTable: In-memory sorted structure for fast writes
//! - SSTable: Immutable on-disk sorted files
//! - WAL: Write-ahead log for durability
//! - Resolution: Combining pending merge operands on read
//! - Compaction: Collapsing versions and operands into fewer tables

mod compaction;
mod iterator;
mod lsm;
mod memtable;
mod resolve;
mod sstable;
mod types;
mod wal;

pub use iterator::{KeyVersionsIterator, MergeIterator};
pub use lsm::{LsmConfig, LsmStats, LsmTree};
pub use memtable::MemTable;
pub use sstable::{SSTableMeta, SSTableReader, SSTableWriter};
pub use types::{Entry, EntryKind, Key, SeqNum, Value};
