use super::{MergeError, MergeOperator};
use crate::lsm::{Key, Value};

/// Appends operands to the base value, separated by a delimiter.
#[derive(Debug, Clone, Default)]
pub struct ConcatOperator {
    delimiter: Vec<u8>,
}

impl ConcatOperator {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl MergeOperator for ConcatOperator {
    fn name(&self) -> &str {
        "ConcatMergeOperator"
    }

    fn full_merge(&self, _key: &Key, existing: Option<&Value>, operands: &[Value]) -> Result<Value, MergeError> {
        let parts = existing.into_iter().chain(operands).map(Value::as_bytes);
        let mut out = Vec::new();
        for (i, part) in parts.enumerate() {
            if i > 0 {
                out.extend_from_slice(&self.delimiter);
            }
            out.extend_from_slice(part);
        }
        Ok(Value::new(out))
    }

    fn partial_merge(&self, _key: &Key, left: &Value, right: &Value) -> Option<Value> {
        let mut out = Vec::with_capacity(left.len() + self.delimiter.len() + right.len());
        out.extend_from_slice(left.as_bytes());
        out.extend_from_slice(&self.delimiter);
        out.extend_from_slice(right.as_bytes());
        Some(Value::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_keeps_order() {
        let op = ConcatOperator::new(",");
        let key = Key::from("k");
        let base = Value::from("a");
        let merged = op
            .full_merge(&key, Some(&base), &[Value::from("b"), Value::from("c")])
            .unwrap();
        assert_eq!(merged.as_bytes(), b"a,b,c");

        let merged = op.full_merge(&key, None, &[Value::from("b")]).unwrap();
        assert_eq!(merged.as_bytes(), b"b");
    }

    #[test]
    fn test_partial_then_full_matches_full() {
        let op = ConcatOperator::new("|");
        let key = Key::from("k");
        let base = Value::from("x");
        let combined = op.partial_merge(&key, &Value::from("y"), &Value::from("z")).unwrap();
        let via_partial = op.full_merge(&key, Some(&base), &[combined]).unwrap();
        let direct = op
            .full_merge(&key, Some(&base), &[Value::from("y"), Value::from("z")])
            .unwrap();
        assert_eq!(via_partial, direct);
    }
}
