//! Read-side merge resolution.
//!
//! Versions of a key are fed newest to oldest. Merge operands accumulate
//! until a put (the base value) or a tombstone (absent base) ends the
//! chain; running out of versions also means the base is absent.

use crate::error::{Error, Result};
use crate::merge::MergeOperator;

use super::types::{EntryKind, Key, Value};

enum Base {
    Value(Value),
    Deleted,
}

pub(crate) struct Resolver {
    /// Pending operands, newest first.
    operands: Vec<Value>,
    base: Option<Base>,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Self {
            operands: Vec::new(),
            base: None,
        }
    }

    /// Feed the next older version. Returns true once the chain is complete
    /// and older versions no longer matter.
    pub(crate) fn feed(&mut self, kind: &EntryKind) -> bool {
        match kind {
            EntryKind::Merge(operand) => {
                self.operands.push(operand.clone());
                false
            }
            EntryKind::Put(value) => {
                self.base = Some(Base::Value(value.clone()));
                true
            }
            EntryKind::Delete => {
                self.base = Some(Base::Deleted);
                true
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.base.is_some()
    }

    pub(crate) fn has_operands(&self) -> bool {
        !self.operands.is_empty()
    }

    /// Produce the visible value. Operands reach the operator oldest first.
    pub(crate) fn resolve(self, operator: Option<&dyn MergeOperator>, key: &Key) -> Result<Option<Value>> {
        let base = match self.base {
            Some(Base::Value(value)) => Some(value),
            Some(Base::Deleted) | None => None,
        };
        if self.operands.is_empty() {
            return Ok(base);
        }

        let operator = operator.ok_or(Error::NoMergeOperator)?;
        let mut operands = self.operands;
        operands.reverse();
        operator
            .full_merge(key, base.as_ref(), &operands)
            .map(Some)
            .map_err(|source| Error::Merge {
                key: key.clone(),
                source,
            })
    }
}
