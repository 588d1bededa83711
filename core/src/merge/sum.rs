use thiserror::Error;

use super::{MergeError, MergeOperator};
use crate::lsm::{Key, Value};

/// Why a value is not a canonical signed decimal integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("no digits")]
    Empty,

    #[error("invalid digit at byte {position}")]
    InvalidDigit { position: usize },

    #[error("out of range for a 64-bit integer")]
    OutOfRange,
}

/// Parse ASCII decimal text: an optional leading '-' followed by one or
/// more digits. No '+', no whitespace.
pub fn parse_decimal(bytes: &[u8]) -> Result<i64, DecimalError> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(DecimalError::Empty);
    }

    let offset = negative as usize;
    let mut acc: i64 = 0;
    for (i, &b) in digits.iter().enumerate() {
        if !b.is_ascii_digit() {
            return Err(DecimalError::InvalidDigit { position: i + offset });
        }
        let digit = (b - b'0') as i64;
        // Accumulate negatives downwards so i64::MIN parses.
        acc = acc
            .checked_mul(10)
            .and_then(|a| if negative { a.checked_sub(digit) } else { a.checked_add(digit) })
            .ok_or(DecimalError::OutOfRange)?;
    }
    Ok(acc)
}

fn encode_decimal(n: i64) -> Value {
    Value::new(n.to_string().into_bytes())
}

/// Sums signed decimal integers. An absent base counts as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumOperator;

impl MergeOperator for SumOperator {
    fn name(&self) -> &str {
        "SumMergeOperator"
    }

    fn full_merge(&self, _key: &Key, existing: Option<&Value>, operands: &[Value]) -> Result<Value, MergeError> {
        // Only the final total has to fit i64, however the operands were
        // grouped by earlier partial merges.
        let mut sum: i128 = match existing {
            Some(value) => parse_decimal(value.as_bytes())
                .map_err(|source| MergeError::MalformedBaseValue { source })?
                .into(),
            None => 0,
        };

        for (index, operand) in operands.iter().enumerate() {
            let n = parse_decimal(operand.as_bytes())
                .map_err(|source| MergeError::MalformedOperand { index, source })?;
            sum = sum.checked_add(n.into()).ok_or(MergeError::Overflow)?;
        }

        i64::try_from(sum)
            .map(encode_decimal)
            .map_err(|_| MergeError::Overflow)
    }

    fn partial_merge(&self, _key: &Key, left: &Value, right: &Value) -> Option<Value> {
        // Malformed operands are left alone so the full merge reports them.
        let left = parse_decimal(left.as_bytes()).ok()?;
        let right = parse_decimal(right.as_bytes()).ok()?;
        left.checked_add(right).map(encode_decimal)
    }
}
