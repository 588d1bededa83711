//! Key-value storage engine with pluggable merge operators.
//!
//! Besides `put`, `get` and `delete`, the store accepts `merge` operands that
//! are combined lazily by a [`MergeOperator`] when the key is read or when
//! tables are compacted, so writers never pay for a read.

// Public API
pub mod error;
pub mod lsm;
pub mod merge;

// Internal modules
pub(crate) mod constants;
pub(crate) mod varint;

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::BG_COMPACTION_INTERVAL_MS;

pub use error::{Error, Result};
pub use lsm::{Key, LsmConfig, LsmStats, LsmTree, SeqNum, Value};
pub use merge::{ConcatOperator, LastWriteWins, MergeError, MergeOperator, SetUnionOperator, SumOperator};

/// Handle to an open store. Runs compaction in the background while open.
pub struct MergeDb {
    tree: Arc<LsmTree>,
    bg_compaction: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl MergeDb {
    pub fn open(config: LsmConfig) -> Result<Self> {
        let tree = Arc::new(LsmTree::open(config)?);

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let tree_clone = Arc::clone(&tree);
        let handle = thread::Builder::new()
            .name("mergedb-compaction".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(Duration::from_millis(BG_COMPACTION_INTERVAL_MS)) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = tree_clone.maybe_compact() {
                                tracing::warn!(error = %e, "background compaction failed");
                            }
                        }
                        // Stop requested or handle dropped.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            tree,
            bg_compaction: Some((stop_tx, handle)),
        })
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<SeqNum> {
        self.tree
            .put(Key::from_slice(key.as_ref()), Value::from_slice(value.as_ref()))
    }

    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, operand: V) -> Result<SeqNum> {
        self.tree
            .merge(Key::from_slice(key.as_ref()), Value::from_slice(operand.as_ref()))
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Value>> {
        self.tree.get(&Key::from_slice(key.as_ref()))
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<SeqNum> {
        self.tree.delete(Key::from_slice(key.as_ref()))
    }

    /// The underlying tree, for flushes, compaction, scans and stats.
    pub fn tree(&self) -> &LsmTree {
        &self.tree
    }

    /// Stop background work and sync the WAL.
    pub fn close(mut self) -> Result<()> {
        self.stop_background();
        self.tree.sync_wal()
    }

    fn stop_background(&mut self) {
        if let Some((stop_tx, handle)) = self.bg_compaction.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                tracing::error!("background compaction thread panicked");
            }
        }
    }
}

impl Drop for MergeDb {
    fn drop(&mut self) {
        self.stop_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn get_temp_dir() -> std::path::PathBuf {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        std::path::PathBuf::from(format!("/tmp/mergedb_db_test_{}", since_epoch.as_nanos()))
    }

    #[test]
    fn test_open_merge_close() {
        let dir = get_temp_dir();

        let db = MergeDb::open(LsmConfig::new(&dir).with_merge_operator(SumOperator)).unwrap();
        db.merge("hits", "2").unwrap();
        db.merge("hits", "3").unwrap();
        assert_eq!(db.get("hits").unwrap(), Some(Value::from("5")));
        db.close().unwrap();

        let db = MergeDb::open(LsmConfig::new(&dir).with_merge_operator(SumOperator)).unwrap();
        assert_eq!(db.get("hits").unwrap(), Some(Value::from("5")));
        db.delete("hits").unwrap();
        assert_eq!(db.get("hits").unwrap(), None);
        drop(db);

        let _ = std::fs::remove_dir_all(dir);
    }
}
