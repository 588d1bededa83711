use super::{MergeError, MergeOperator};
use crate::lsm::{Key, Value};

/// The newest operand wins; the base value is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl MergeOperator for LastWriteWins {
    fn name(&self) -> &str {
        "LastWriteWinsMergeOperator"
    }

    fn full_merge(&self, _key: &Key, existing: Option<&Value>, operands: &[Value]) -> Result<Value, MergeError> {
        Ok(operands.last().or(existing).cloned().unwrap_or_default())
    }

    fn partial_merge(&self, _key: &Key, _left: &Value, right: &Value) -> Option<Value> {
        Some(right.clone())
    }
}
