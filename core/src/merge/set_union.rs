use std::collections::BTreeSet;

use super::{MergeError, MergeOperator};
use crate::lsm::{Key, Value};

/// Treats values as `delimiter`-separated sets and merges by union.
///
/// Output members are sorted bytewise and deduplicated; empty members are
/// dropped.
#[derive(Debug, Clone, Copy)]
pub struct SetUnionOperator {
    delimiter: u8,
}

impl SetUnionOperator {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    fn union<'a>(&self, values: impl Iterator<Item = &'a Value>) -> Value {
        let members: BTreeSet<&[u8]> = values
            .flat_map(|v| v.as_bytes().split(|b| *b == self.delimiter))
            .filter(|m| !m.is_empty())
            .collect();
        let members: Vec<&[u8]> = members.into_iter().collect();
        Value::new(members.join(&self.delimiter))
    }
}

impl Default for SetUnionOperator {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl MergeOperator for SetUnionOperator {
    fn name(&self) -> &str {
        "SetUnionMergeOperator"
    }

    fn full_merge(&self, _key: &Key, existing: Option<&Value>, operands: &[Value]) -> Result<Value, MergeError> {
        Ok(self.union(existing.into_iter().chain(operands)))
    }

    fn partial_merge(&self, _key: &Key, left: &Value, right: &Value) -> Option<Value> {
        Some(self.union([left, right].into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_sorted_and_deduplicated() {
        let op = SetUnionOperator::default();
        let base = Value::from("b,a");
        let merged = op
            .full_merge(&Key::from("k"), Some(&base), &[Value::from("c,a"), Value::from(",b,")])
            .unwrap();
        assert_eq!(merged.as_bytes(), b"a,b,c");
    }
}
