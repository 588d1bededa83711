//! Collapsing versions when memtables are flushed and tables compacted.
//!
//! Within one key, everything older than the newest put or tombstone is
//! shadowed and dropped. Pending operands are full-merged into a put when
//! their base is known: it sits in the same input, or the input is the
//! bottom of the tree so the base is absent. Otherwise adjacent operands
//! are pre-combined with partial merges. A failed merge leaves the
//! versions as they were so no operand is lost.

use crate::merge::MergeOperator;

use super::types::{Entry, EntryKind, Key, Value};

/// Collapse the versions of `key` (newest first) into what should be written
/// to the output table, also newest first.
pub(crate) fn collapse_versions(
    operator: Option<&dyn MergeOperator>,
    key: &Key,
    mut versions: Vec<Entry>,
    bottommost: bool,
) -> Vec<Entry> {
    let Some(newest_seq) = versions.first().map(|e| e.seq_num) else {
        return versions;
    };
    let base_idx = versions.iter().position(|e| !e.is_merge());

    // Drop everything the base shadows.
    if let Some(idx) = base_idx {
        versions.truncate(idx + 1);
    }

    if base_idx == Some(0) {
        if bottommost && versions[0].is_tombstone() {
            return vec![];
        }
        return versions;
    }

    let Some(operator) = operator else {
        return versions;
    };

    if base_idx.is_some() || bottommost {
        let operand_count = base_idx.unwrap_or(versions.len());
        let existing = base_idx.and_then(|idx| match &versions[idx].kind {
            EntryKind::Put(value) => Some(value),
            _ => None,
        });
        let operands: Vec<Value> = versions[..operand_count]
            .iter()
            .rev()
            .filter_map(|e| e.kind.payload().cloned())
            .collect();

        match operator.full_merge(key, existing, &operands) {
            Ok(value) => return vec![Entry::put(key.clone(), newest_seq, value)],
            Err(e) => {
                tracing::warn!(%key, error = %e, operands = operand_count, "keeping unmerged operands");
                return versions;
            }
        }
    }

    partial_merge_operands(operator, key, versions)
}

/// Chain partial merges over adjacent operands, oldest to newest. A combined
/// operand takes the sequence number of its newest input.
fn partial_merge_operands(operator: &dyn MergeOperator, key: &Key, versions: Vec<Entry>) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::with_capacity(versions.len());
    for entry in versions.into_iter().rev() {
        if let (Some(last), EntryKind::Merge(right)) = (out.last_mut(), &entry.kind) {
            if let EntryKind::Merge(left) = &last.kind {
                if let Some(combined) = operator.partial_merge(key, left, right) {
                    last.kind = EntryKind::Merge(combined);
                    last.seq_num = entry.seq_num;
                    continue;
                }
            }
        }
        out.push(entry);
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::testing::RecordingOperator;
    use crate::merge::SumOperator;

    fn key() -> Key {
        Key::from("k")
    }

    fn merge(seq: u64, operand: &str) -> Entry {
        Entry::merge(key(), seq, Value::from(operand))
    }

    fn put(seq: u64, value: &str) -> Entry {
        Entry::put(key(), seq, Value::from(value))
    }

    #[test]
    fn test_shadowed_versions_dropped() {
        let out = collapse_versions(Some(&SumOperator), &key(), vec![put(3, "1"), merge(2, "5"), put(1, "0")], false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EntryKind::Put(Value::from("1")));
    }

    #[test]
    fn test_tombstone_dropped_at_bottom_only() {
        let versions = vec![Entry::delete(key(), 2), put(1, "0")];
        assert!(collapse_versions(None, &key(), versions.clone(), true).is_empty());

        let out = collapse_versions(None, &key(), versions, false);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_tombstone());
    }

    #[test]
    fn test_full_merge_onto_base() {
        let versions = vec![merge(4, "7"), merge(3, "3"), put(2, "10"), merge(1, "99")];
        let out = collapse_versions(Some(&SumOperator), &key(), versions, false);
        assert_eq!(out, vec![put(4, "20")]);
        assert_eq!(out[0].kind, EntryKind::Put(Value::from("20")));
    }

    #[test]
    fn test_full_merge_at_bottom_without_base() {
        let versions = vec![merge(2, "7"), merge(1, "3")];
        let out = collapse_versions(Some(&SumOperator), &key(), versions, true);
        assert_eq!(out[0].kind, EntryKind::Put(Value::from("10")));
        assert_eq!(out[0].seq_num, 2);
    }

    #[test]
    fn test_partial_merge_above_unknown_base() {
        let versions = vec![merge(3, "1"), merge(2, "2"), merge(1, "3")];
        let out = collapse_versions(Some(&SumOperator), &key(), versions, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EntryKind::Merge(Value::from("6")));
        assert_eq!(out[0].seq_num, 3);
    }

    #[test]
    fn test_partial_merge_declined_keeps_order() {
        // The recording operator declines every partial merge.
        let recorder = RecordingOperator::default();
        let versions = vec![merge(3, "c"), merge(2, "b"), merge(1, "a")];
        let out = collapse_versions(Some(&recorder), &key(), versions, false);
        let seqs: Vec<_> = out.iter().map(|e| e.seq_num).collect();
        assert_eq!(seqs, vec![3, 2, 1]);
    }

    #[test]
    fn test_partial_merge_around_malformed_operand() {
        let versions = vec![merge(4, "1"), merge(3, "2"), merge(2, "bad"), merge(1, "3")];
        let out = collapse_versions(Some(&SumOperator), &key(), versions, false);
        let kinds: Vec<_> = out.iter().map(|e| (e.seq_num, e.kind.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (4, EntryKind::Merge(Value::from("3"))),
                (2, EntryKind::Merge(Value::from("bad"))),
                (1, EntryKind::Merge(Value::from("3"))),
            ]
        );
    }

    #[test]
    fn test_failed_full_merge_keeps_operands() {
        let versions = vec![merge(3, "1"), merge(2, "oops"), put(1, "0")];
        let out = collapse_versions(Some(&SumOperator), &key(), versions, true);
        assert_eq!(out.len(), 3);
        assert!(out[1].is_merge());
        assert_eq!(out[2].kind, EntryKind::Put(Value::from("0")));
    }

    #[test]
    fn test_no_operator_keeps_operands() {
        let versions = vec![merge(2, "1"), put(1, "0")];
        let out = collapse_versions(None, &key(), versions, true);
        assert_eq!(out.len(), 2);
    }
}
