//! Merge operators.
//!
//! A merge operator lets callers push an update for a key (an *operand*)
//! without reading the current value first. The store keeps the operands
//! as versioned entries and only combines them, together with the newest
//! base value, when the key is read or when a flush or compaction decides
//! to collapse them.
//!
//! Operators are plain values behind the [`MergeOperator`] trait:
//! - [`SumOperator`]: signed decimal counters.
//! - [`ConcatOperator`]: byte concatenation with a delimiter.
//! - [`LastWriteWins`]: the newest operand replaces everything.
//! - [`SetUnionOperator`]: delimiter-separated set union.

mod concat;
mod last_write;
mod set_union;
mod sum;

use thiserror::Error;

use crate::lsm::{Key, Value};

pub use concat::ConcatOperator;
pub use last_write::LastWriteWins;
pub use set_union::SetUnionOperator;
pub use sum::{parse_decimal, DecimalError, SumOperator};

/// Why a full merge could not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Operand at `index` (0 = oldest pending operand) could not be parsed.
    #[error("malformed operand {index}: {source}")]
    MalformedOperand {
        index: usize,
        #[source]
        source: DecimalError,
    },

    /// The base value under the operands could not be parsed.
    #[error("malformed base value: {source}")]
    MalformedBaseValue {
        #[source]
        source: DecimalError,
    },

    /// The combined value does not fit the operator's representation.
    #[error("integer overflow while merging")]
    Overflow,
}

/// Combines a base value and a sequence of operands into one value.
///
/// Implementations must be pure. They are called on the read path and from
/// flush/compaction, possibly from several threads at once, and must not
/// block or do I/O.
pub trait MergeOperator: Send + Sync {
    /// Stable identifier. Persisted when a store is created and compared on
    /// every reopen; a store refuses to open under a different name.
    fn name(&self) -> &str;

    /// Resolve `existing` (absent when the key has no base value) and the
    /// pending `operands`, oldest first, into the materialized value.
    ///
    /// The store never calls this with an empty operand slice. Returning an
    /// error aborts the resolution: the caller sees the error and the
    /// operands are kept.
    fn full_merge(&self, key: &Key, existing: Option<&Value>, operands: &[Value]) -> Result<Value, MergeError>;

    /// Pre-combine two adjacent operands, `left` older than `right`, into
    /// one operand without a base value.
    ///
    /// Return `None` when the pair cannot be combined safely; both operands
    /// are then kept as they are. The default declines every pair.
    fn partial_merge(&self, _key: &Key, _left: &Value, _right: &Value) -> Option<Value> {
        None
    }
}
