/// Interval between background compaction checks.
pub const BG_COMPACTION_INTERVAL_MS: u64 = 1000;

/// Default memtable size before it is flushed to an SSTable.
pub const DEFAULT_MEMTABLE_SIZE: usize = 4 * 1024 * 1024;

/// Default number of SSTables that triggers a full compaction.
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;

/// One sparse index entry is written every this many table entries.
pub const SSTABLE_INDEX_INTERVAL: usize = 16;

/// Digits used when naming SSTable files.
pub const SSTABLE_FILE_NUM_DIGITS: usize = 6;

/// Trailer magic: "MRGTABLE" in ASCII.
pub const SSTABLE_MAGIC: u64 = 0x4D52_4754_4142_4C45;

/// Footer is six little-endian u64 fields.
pub const SSTABLE_FOOTER_SIZE: usize = 6 * 8;

pub const WAL_FILE_NAME: &str = "wal.log";
pub const MANIFEST_FILE_NAME: &str = "manifest";
pub const MERGE_OPERATOR_FILE_NAME: &str = "MERGE_OPERATOR";
