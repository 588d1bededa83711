//! Error types for the store.

use thiserror::Error;

use crate::lsm::Key;
use crate::merge::MergeError;

/// Errors returned by store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the files backing the store, including undecodable
    /// table files. Passed through unchanged.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The merge operator refused to combine the pending operands of a key.
    /// The operands stay in the store untouched.
    #[error("merge failed for key {key}: {source}")]
    Merge {
        key: Key,
        #[source]
        source: MergeError,
    },

    /// The store was created with a different merge operator.
    #[error(
        "merge operator mismatch: store was created with {}, opened with {}",
        display_name(.expected),
        display_name(.found)
    )]
    OperatorMismatch {
        expected: Option<String>,
        found: Option<String>,
    },

    /// A merge was requested, or merge operands were found, without a
    /// configured merge operator.
    #[error("no merge operator configured")]
    NoMergeOperator,
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("\"{}\"", name),
        None => "no merge operator".to_string(),
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
