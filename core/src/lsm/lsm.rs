//! LSM Tree - Main coordinator for the key-value store.
//!
//! Manages memtable lifecycle, SSTable creation, compaction, and the read
//! path, including merge resolution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::constants::{
    DEFAULT_COMPACTION_TRIGGER, DEFAULT_MEMTABLE_SIZE, MANIFEST_FILE_NAME, MERGE_OPERATOR_FILE_NAME, WAL_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::merge::MergeOperator;

use super::compaction::collapse_versions;
use super::iterator::{KeyVersionsIterator, MergeIterator};
use super::memtable::MemTable;
use super::resolve::Resolver;
use super::sstable::{SSTableReader, SSTableWriter};
use super::types::{Entry, EntryKind, Key, SeqNum, Value};
use super::wal::{Wal, WalReader};

/// Configuration for the LSM tree.
#[derive(Clone)]
pub struct LsmConfig {
    /// Maximum memtable size before flushing to SSTable.
    pub memtable_size_threshold: usize,
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Number of SSTables at which a full compaction runs.
    pub compaction_trigger: usize,
    /// Cache merge results until the next write to the key.
    pub cache_resolved_values: bool,
    /// fsync the WAL after every write.
    pub sync_writes: bool,
    /// Operator used to resolve merge operands. Fixed for the life of the
    /// store.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            memtable_size_threshold: DEFAULT_MEMTABLE_SIZE,
            data_dir: PathBuf::from("./data"),
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            cache_resolved_values: true,
            sync_writes: false,
            merge_operator: None,
        }
    }
}

impl LsmConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_merge_operator<M: MergeOperator + 'static>(mut self, operator: M) -> Self {
        self.merge_operator = Some(Arc::new(operator));
        self
    }

    fn merge_operator_name(&self) -> Option<String> {
        self.merge_operator.as_ref().map(|op| op.name().to_string())
    }
}

impl fmt::Debug for LsmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsmConfig")
            .field("memtable_size_threshold", &self.memtable_size_threshold)
            .field("data_dir", &self.data_dir)
            .field("compaction_trigger", &self.compaction_trigger)
            .field("cache_resolved_values", &self.cache_resolved_values)
            .field("sync_writes", &self.sync_writes)
            .field("merge_operator", &self.merge_operator_name())
            .finish()
    }
}

/// Memtable and table list, swapped together so readers never see an entry
/// twice or miss one across a flush.
struct LsmState {
    memtable: MemTable,
    /// Immutable SSTables (newest first).
    sstables: Vec<Arc<SSTableReader>>,
}

/// LSM Tree key-value store with merge operator support.
pub struct LsmTree {
    config: LsmConfig,

    /// Write-ahead log. Its lock also serializes writers.
    wal: Mutex<Wal>,

    state: RwLock<LsmState>,

    /// Merge results, valid until the next write to the key.
    resolved: DashMap<Key, Value>,

    /// Held for the duration of a compaction.
    compaction_lock: Mutex<()>,

    /// Next SSTable file ID.
    next_sstable_id: AtomicU64,
}

impl LsmTree {
    /// Create a new LSM tree or open an existing one.
    pub fn open(config: LsmConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::check_merge_operator(&config)?;

        let (sstables, next_id) = Self::load_sstables(&config.data_dir)?;
        let max_table_seq = sstables.iter().map(|s| s.meta.max_seq).max().unwrap_or(0);

        // Recover memtable from WAL if exists
        let wal_path = config.data_dir.join(WAL_FILE_NAME);
        let memtable = Self::recover_memtable(&wal_path, max_table_seq)?;
        let wal = Wal::open(&wal_path)?.sync_on_append(config.sync_writes);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            wal = %wal.path().display(),
            sstables = sstables.len(),
            recovered = memtable.len(),
            merge_operator = ?config.merge_operator_name(),
            "opened store"
        );

        Ok(Self {
            config,
            wal: Mutex::new(wal),
            state: RwLock::new(LsmState {
                memtable,
                sstables: sstables.into_iter().map(Arc::new).collect(),
            }),
            resolved: DashMap::new(),
            compaction_lock: Mutex::new(()),
            next_sstable_id: AtomicU64::new(next_id),
        })
    }

    /// Record the operator name on first open; refuse to reopen under a
    /// different one.
    fn check_merge_operator(config: &LsmConfig) -> Result<()> {
        let path = config.data_dir.join(MERGE_OPERATOR_FILE_NAME);
        let found = config.merge_operator_name();

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let expected = Some(content.trim_end_matches('\n'))
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);
                if expected != found {
                    return Err(Error::OperatorMismatch { expected, found });
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&path, found.unwrap_or_default())?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replay the WAL. Entries at or below `max_table_seq` already reached an
    /// SSTable before a crash interrupted the WAL reset; replaying them would
    /// apply their merge operands twice.
    fn recover_memtable(wal_path: &Path, max_table_seq: SeqNum) -> Result<MemTable> {
        let mut memtable = MemTable::with_seq_num(max_table_seq + 1);

        match WalReader::open(wal_path) {
            Ok(mut reader) => {
                let mut skipped = 0usize;
                for entry in reader.read_all()? {
                    if entry.seq_num <= max_table_seq {
                        skipped += 1;
                        continue;
                    }
                    memtable.insert(entry);
                }
                if skipped > 0 {
                    tracing::warn!(skipped, "skipped WAL entries already persisted in SSTables");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(memtable)
    }

    /// Open the tables listed in the manifest. The manifest lists them newest
    /// first, which is also the read order.
    fn load_sstables(data_dir: &Path) -> Result<(Vec<SSTableReader>, u64)> {
        let mut sstables = Vec::new();
        let mut max_id = 0u64;

        // Tables that never got renamed into place were not published.
        for dir_entry in std::fs::read_dir(data_dir)? {
            let path = dir_entry?.path();
            if path.to_string_lossy().ends_with(".sst.tmp") {
                tracing::warn!(path = %path.display(), "removing unfinished SSTable");
                std::fs::remove_file(&path)?;
            }
        }

        let manifest_path = data_dir.join(MANIFEST_FILE_NAME);
        if manifest_path.exists() {
            let manifest_content = std::fs::read_to_string(&manifest_path)?;
            for line in manifest_content.lines() {
                let id = line.trim().parse::<u64>().map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("bad manifest line {:?}", line),
                    )
                })?;
                max_id = max_id.max(id);
                sstables.push(SSTableReader::open(data_dir, id)?);
            }
        }

        Ok((sstables, max_id + 1))
    }

    fn save_manifest(&self, sstables: &[Arc<SSTableReader>]) -> Result<()> {
        let manifest_path = self.config.data_dir.join(MANIFEST_FILE_NAME);
        let tmp_path = manifest_path.with_extension("tmp");
        let content: String = sstables
            .iter()
            .map(|s| s.meta.id.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(tmp_path, manifest_path)?;
        Ok(())
    }

    fn operator(&self) -> Option<&dyn MergeOperator> {
        self.config.merge_operator.as_deref()
    }

    /// Put a key-value pair. Pending merge operands for the key are
    /// discarded: the new value is the base for later merges.
    pub fn put(&self, key: Key, value: Value) -> Result<SeqNum> {
        self.write(key, EntryKind::Put(value))
    }

    /// Queue a merge operand for a key. The operand is neither read nor
    /// validated here; it is combined when the key is read or compacted.
    pub fn merge(&self, key: Key, operand: Value) -> Result<SeqNum> {
        if self.config.merge_operator.is_none() {
            return Err(Error::NoMergeOperator);
        }
        self.write(key, EntryKind::Merge(operand))
    }

    /// Delete a key.
    pub fn delete(&self, key: Key) -> Result<SeqNum> {
        self.write(key, EntryKind::Delete)
    }

    fn write(&self, key: Key, kind: EntryKind) -> Result<SeqNum> {
        let (seq_num, flushed) = {
            let mut wal = self.wal.lock();

            // Only WAL holders advance the sequence, so this stays current
            // until the insert below.
            let seq_num = self.state.read().memtable.current_seq_num();
            let entry = Entry { key, seq_num, kind };

            wal.append(&entry)?;

            let should_flush = {
                let mut state = self.state.write();
                self.resolved.remove(&entry.key);
                state.memtable.insert(entry);
                state.memtable.size_bytes() >= self.config.memtable_size_threshold
            };

            if should_flush {
                self.flush_locked(&mut wal)?;
            }
            (seq_num, should_flush)
        };

        // Compaction runs without blocking writers.
        if flushed {
            self.maybe_compact()?;
        }
        Ok(seq_num)
    }

    /// Get the fully resolved value for a key.
    /// Returns None if not found or deleted.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        if let Some(value) = self.resolved.get(key) {
            return Ok(Some(value.value().clone()));
        }

        let state = self.state.read();
        let mut resolver = Resolver::new();

        // Check memtable first
        for (_, kind) in state.memtable.versions(key) {
            if resolver.feed(kind) {
                break;
            }
        }

        // Check SSTables (newest to oldest)
        if !resolver.is_done() {
            'tables: for sstable in state.sstables.iter() {
                for entry in sstable.get(key)? {
                    if resolver.feed(&entry.kind) {
                        break 'tables;
                    }
                }
            }
        }

        let merged = resolver.has_operands();
        let value = resolver.resolve(self.operator(), key)?;

        // Insert while still holding the read lock so a concurrent write,
        // which invalidates under the write lock, cannot be overtaken.
        if merged && self.config.cache_resolved_values {
            if let Some(value) = &value {
                self.resolved.insert(key.clone(), value.clone());
            }
        }
        drop(state);

        Ok(value)
    }

    /// All live keys with their resolved values, in key order.
    pub fn scan(&self) -> Result<Vec<(Key, Value)>> {
        let state = self.state.read();

        let mut sources: Vec<Box<dyn Iterator<Item = std::io::Result<Entry>> + '_>> = Vec::new();
        sources.push(Box::new(state.memtable.iter().map(Ok::<Entry, std::io::Error>)));
        for sstable in state.sstables.iter() {
            sources.push(Box::new(sstable.iter()));
        }

        let mut results = Vec::new();
        for group in KeyVersionsIterator::new(MergeIterator::new(sources)) {
            let (key, versions) = group?;
            let mut resolver = Resolver::new();
            for entry in &versions {
                if resolver.feed(&entry.kind) {
                    break;
                }
            }
            if let Some(value) = resolver.resolve(self.operator(), &key)? {
                results.push((key, value));
            }
        }

        Ok(results)
    }

    /// Force flush the memtable to an SSTable.
    pub fn flush(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        self.flush_locked(&mut wal)
    }

    /// Flush with the WAL lock held, so no writer can touch the memtable.
    fn flush_locked(&self, wal: &mut Wal) -> Result<()> {
        let (entries, bottommost) = {
            let state = self.state.read();
            if state.memtable.is_empty() {
                return Ok(());
            }
            let entries: Vec<Entry> = state.memtable.iter().collect();
            (entries, state.sstables.is_empty())
        };
        let entry_count = entries.len();

        let sstable_id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let reader = self.write_sstable(sstable_id, entries.into_iter().map(Ok), bottommost)?;

        {
            let mut state = self.state.write();
            if let Some(reader) = reader {
                state.sstables.insert(0, Arc::new(reader)); // Insert at front (newest)
            }
            // Preserve sequence number across flushes
            let seq_num = state.memtable.current_seq_num();
            state.memtable = MemTable::with_seq_num(seq_num);
            self.save_manifest(&state.sstables)?;
        }

        wal.reset()?;
        tracing::debug!(sstable_id, entry_count, bottommost, "flushed memtable");

        Ok(())
    }

    /// Write collapsed entries to a new table. Returns None when nothing
    /// survived the collapse.
    fn write_sstable<I>(&self, id: u64, entries: I, bottommost: bool) -> Result<Option<SSTableReader>>
    where
        I: Iterator<Item = std::io::Result<Entry>>,
    {
        let mut writer = SSTableWriter::new(&self.config.data_dir, id)?;
        if let Err(e) = self.write_collapsed(&mut writer, entries, bottommost) {
            if let Err(cleanup) = writer.abandon() {
                tracing::warn!(sstable_id = id, error = %cleanup, "failed to remove unfinished SSTable");
            }
            return Err(e);
        }

        if writer.entry_count() == 0 {
            writer.abandon()?;
            return Ok(None);
        }
        writer.finish()?;
        Ok(Some(SSTableReader::open(&self.config.data_dir, id)?))
    }

    fn write_collapsed<I>(&self, writer: &mut SSTableWriter, entries: I, bottommost: bool) -> Result<()>
    where
        I: Iterator<Item = std::io::Result<Entry>>,
    {
        for group in KeyVersionsIterator::new(entries) {
            let (key, versions) = group?;
            for entry in collapse_versions(self.operator(), &key, versions, bottommost) {
                writer.write_entry(&entry)?;
            }
        }
        Ok(())
    }

    /// Compact if the number of SSTables reached the configured trigger.
    pub fn maybe_compact(&self) -> Result<()> {
        let should_compact = self.state.read().sstables.len() >= self.config.compaction_trigger;
        if should_compact {
            self.compact()?;
        }
        Ok(())
    }

    /// Merge every SSTable into one. The result is the bottom of the tree, so
    /// pending operands are fully merged and tombstones dropped.
    pub fn compact(&self) -> Result<()> {
        let _guard = self.compaction_lock.lock();

        let inputs: Vec<Arc<SSTableReader>> = self.state.read().sstables.clone();
        if inputs.is_empty() {
            return Ok(());
        }

        let sstable_id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let sources: Vec<_> = inputs.iter().map(|t| t.iter()).collect();
        let output = self.write_sstable(sstable_id, MergeIterator::new(sources), true)?;
        let output_entries = output.as_ref().map_or(0, |t| t.meta.entry_count);

        {
            let mut state = self.state.write();
            // Tables flushed meanwhile are newer and stay in front.
            state
                .sstables
                .retain(|table| !inputs.iter().any(|input| Arc::ptr_eq(input, table)));
            if let Some(output) = output {
                state.sstables.push(Arc::new(output));
            }
            self.save_manifest(&state.sstables)?;
        }

        for table in &inputs {
            if let Err(e) = std::fs::remove_file(table.path()) {
                tracing::warn!(path = %table.path().display(), error = %e, "failed to remove compacted SSTable");
            }
        }

        tracing::debug!(
            inputs = inputs.len(),
            input_entries = inputs.iter().map(|t| t.meta.entry_count).sum::<u64>(),
            output_entries,
            "compacted SSTables"
        );
        Ok(())
    }

    /// Sync the WAL to disk.
    pub fn sync_wal(&self) -> Result<()> {
        self.wal.lock().sync()?;
        Ok(())
    }

    /// Get statistics about the LSM tree.
    pub fn stats(&self) -> LsmStats {
        let state = self.state.read();

        LsmStats {
            memtable_entries: state.memtable.len(),
            memtable_size_bytes: state.memtable.size_bytes(),
            memtable_merge_operands: state.memtable.merge_operand_count(),
            sstable_count: state.sstables.len(),
            total_entries: state.sstables.iter().map(|s| s.meta.entry_count).sum::<u64>() as usize
                + state.memtable.len(),
            cached_values: self.resolved.len(),
        }
    }
}

/// Statistics about the LSM tree.
#[derive(Debug, Clone)]
pub struct LsmStats {
    pub memtable_entries: usize,
    pub memtable_size_bytes: usize,
    pub memtable_merge_operands: usize,
    pub sstable_count: usize,
    pub total_entries: usize,
    pub cached_values: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{ConcatOperator, SumOperator};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn get_temp_dir() -> PathBuf {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        PathBuf::from(format!("/tmp/mergedb_lsm_test_{}", since_epoch.as_nanos()))
    }

    fn sum_config(dir: &Path) -> LsmConfig {
        LsmConfig::new(dir).with_merge_operator(SumOperator)
    }

    fn get_str(lsm: &LsmTree, key: &str) -> Option<String> {
        lsm.get(&Key::from(key))
            .unwrap()
            .map(|v| String::from_utf8(v.0).unwrap())
    }

    #[test]
    fn test_basic_put_get() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(LsmConfig::new(&dir)).unwrap();

        lsm.put(Key::from("key1"), Value::from("value1")).unwrap();
        lsm.put(Key::from("key2"), Value::from("value2")).unwrap();

        assert_eq!(get_str(&lsm, "key1").as_deref(), Some("value1"));
        assert_eq!(get_str(&lsm, "key2").as_deref(), Some("value2"));
        assert!(lsm.get(&Key::from("key3")).unwrap().is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_merge_requires_operator() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(LsmConfig::new(&dir)).unwrap();

        let err = lsm.merge(Key::from("k"), Value::from("1")).unwrap_err();
        assert!(matches!(err, Error::NoMergeOperator));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_merge_put_override() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.merge(Key::from("k"), Value::from("5")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("5"));

        lsm.merge(Key::from("k"), Value::from("10")).unwrap();
        lsm.merge(Key::from("k"), Value::from("15")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("30"));

        lsm.put(Key::from("k"), Value::from("0")).unwrap();
        for operand in ["20", "30", "7", "8", "5"] {
            lsm.merge(Key::from("k"), Value::from(operand)).unwrap();
        }
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("70"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_delete_then_merge() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.put(Key::from("k"), Value::from("100")).unwrap();
        lsm.delete(Key::from("k")).unwrap();
        assert!(lsm.get(&Key::from("k")).unwrap().is_none());

        lsm.merge(Key::from("k"), Value::from("3")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("3"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_cache_invalidated_by_writes() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.merge(Key::from("k"), Value::from("1")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("1"));
        assert_eq!(lsm.stats().cached_values, 1);
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("1"));

        lsm.merge(Key::from("k"), Value::from("1")).unwrap();
        assert_eq!(lsm.stats().cached_values, 0);
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("2"));

        lsm.put(Key::from("k"), Value::from("9")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("9"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_malformed_operand_is_an_error() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.merge(Key::from("k"), Value::from("1")).unwrap();
        lsm.merge(Key::from("k"), Value::from("abc")).unwrap();

        let err = lsm.get(&Key::from("k")).unwrap_err();
        assert!(matches!(err, Error::Merge { .. }));
        assert_eq!(lsm.stats().cached_values, 0);

        // The operand is kept, so a put is the way out.
        lsm.flush().unwrap();
        assert!(lsm.get(&Key::from("k")).is_err());
        lsm.put(Key::from("k"), Value::from("0")).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("0"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_operands_across_flushes() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.put(Key::from("k"), Value::from("1")).unwrap();
        lsm.flush().unwrap();
        lsm.merge(Key::from("k"), Value::from("2")).unwrap();
        lsm.flush().unwrap();
        lsm.merge(Key::from("k"), Value::from("3")).unwrap();
        lsm.merge(Key::from("k"), Value::from("4")).unwrap();
        lsm.flush().unwrap();
        lsm.merge(Key::from("k"), Value::from("5")).unwrap();

        assert_eq!(lsm.stats().sstable_count, 3);
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("15"));

        lsm.compact().unwrap();
        assert_eq!(lsm.stats().sstable_count, 1);
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("15"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_flush_and_recover() {
        let dir = get_temp_dir();
        let config = LsmConfig {
            memtable_size_threshold: 100, // Small threshold for testing
            ..sum_config(&dir)
        };

        // Write and flush
        {
            let lsm = LsmTree::open(config.clone()).unwrap();
            lsm.put(Key::from("key1"), Value::from("value1")).unwrap();
            lsm.merge(Key::from("count"), Value::from("2")).unwrap();
            lsm.flush().unwrap();
            // These stay in the WAL only.
            lsm.merge(Key::from("count"), Value::from("3")).unwrap();
        }

        // Reopen and verify
        {
            let lsm = LsmTree::open(config).unwrap();
            assert_eq!(get_str(&lsm, "key1").as_deref(), Some("value1"));
            assert_eq!(get_str(&lsm, "count").as_deref(), Some("5"));

            // Sequence numbers keep growing after recovery.
            let seq = lsm.merge(Key::from("count"), Value::from("1")).unwrap();
            assert!(seq > 3);
            assert_eq!(get_str(&lsm, "count").as_deref(), Some("6"));
        }

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_wal_entries_already_flushed_are_skipped() {
        let dir = get_temp_dir();
        let config = sum_config(&dir);

        {
            let lsm = LsmTree::open(config.clone()).unwrap();
            lsm.merge(Key::from("k"), Value::from("10")).unwrap();
            lsm.flush().unwrap();
        }

        // Simulate a crash between publishing the table and resetting the WAL.
        {
            let mut wal = Wal::open(dir.join(WAL_FILE_NAME)).unwrap();
            wal.append(&Entry::merge(Key::from("k"), 1, Value::from("10"))).unwrap();
        }

        let lsm = LsmTree::open(config).unwrap();
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("10"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_failed_table_write_leaves_no_temp_file() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        let entries = vec![
            Ok(Entry::merge(Key::from("a"), 1, Value::from("1"))),
            Err(std::io::Error::other("read failed")),
        ];
        assert!(lsm.write_sstable(99, entries.into_iter(), false).is_err());
        assert!(!dir.join("000099.sst.tmp").exists());
        assert!(!dir.join("000099.sst").exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unfinished_tables_removed_on_open() {
        let dir = get_temp_dir();
        {
            let lsm = LsmTree::open(sum_config(&dir)).unwrap();
            lsm.merge(Key::from("k"), Value::from("4")).unwrap();
            lsm.flush().unwrap();
        }
        std::fs::write(dir.join("000042.sst.tmp"), b"partial").unwrap();

        let lsm = LsmTree::open(sum_config(&dir)).unwrap();
        assert!(!dir.join("000042.sst.tmp").exists());
        assert_eq!(get_str(&lsm, "k").as_deref(), Some("4"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_operator_mismatch() {
        let dir = get_temp_dir();

        {
            let lsm = LsmTree::open(sum_config(&dir)).unwrap();
            lsm.merge(Key::from("k"), Value::from("1")).unwrap();
        }

        let err = LsmTree::open(LsmConfig::new(&dir).with_merge_operator(ConcatOperator::default()))
            .err()
            .unwrap();
        match err {
            Error::OperatorMismatch { expected, found } => {
                assert_eq!(expected.as_deref(), Some("SumMergeOperator"));
                assert_eq!(found.as_deref(), Some("ConcatMergeOperator"));
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(matches!(
            LsmTree::open(LsmConfig::new(&dir)),
            Err(Error::OperatorMismatch { .. })
        ));
        assert!(LsmTree::open(sum_config(&dir)).is_ok());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_scan() {
        let dir = get_temp_dir();
        let lsm = LsmTree::open(sum_config(&dir)).unwrap();

        lsm.put(Key::from("c"), Value::from("3")).unwrap();
        lsm.merge(Key::from("a"), Value::from("1")).unwrap();
        lsm.flush().unwrap();
        lsm.merge(Key::from("a"), Value::from("1")).unwrap();
        lsm.put(Key::from("b"), Value::from("2")).unwrap();
        lsm.delete(Key::from("c")).unwrap();

        let entries = lsm.scan().unwrap();
        let pairs: Vec<_> = entries
            .iter()
            .map(|(k, v)| (k.as_bytes(), v.as_bytes()))
            .collect();
        assert_eq!(pairs, vec![(&b"a"[..], &b"2"[..]), (&b"b"[..], &b"2"[..])]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_automatic_flush_and_compaction() {
        let dir = get_temp_dir();
        let config = LsmConfig {
            memtable_size_threshold: 256,
            compaction_trigger: 3,
            ..sum_config(&dir)
        };
        let lsm = LsmTree::open(config).unwrap();

        let mut expected = 0i64;
        for i in 0..500i64 {
            let key = Key::from(format!("counter-{}", i % 7).as_str());
            lsm.merge(key, Value::from((i - 250).to_string().as_str())).unwrap();
            if i % 7 == 3 {
                expected += i - 250;
            }
        }

        let stats = lsm.stats();
        assert!(stats.sstable_count < 3, "{:?}", stats);
        assert_eq!(get_str(&lsm, "counter-3"), Some(expected.to_string()));

        let _ = std::fs::remove_dir_all(dir);
    }
}
