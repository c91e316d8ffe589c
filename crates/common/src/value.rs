//! Comparison and ordering helpers for dynamically typed row values.
//!
//! Rows carry raw `serde_json::Value`s, so every comparison in predicates,
//! sorts, joins, and indexes funnels through these functions. Values of
//! different kinds never compare (a predicate over them is simply false);
//! numbers compare as f64, strings lexicographically, and booleans with
//! `false < true`.

use serde_json::Value;
use std::cmp::Ordering;

/// Compare two values of the same kind; `None` when the kinds differ or the
/// kind has no defined order (arrays, objects).
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64()?;
            let y = y.as_f64()?;
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Equality for predicates: numeric equality across integer/float
/// representations, deep equality for everything else.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Total order used for index keys and ORDER BY: Null < Bool < Number < String,
/// with arrays and objects sorted last by their serialized form.
pub fn value_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over arbitrary values, falling back to the rank and the
/// canonical serialization where `value_cmp` has no answer.
pub fn value_total_cmp(a: &Value, b: &Value) -> Ordering {
    if let Some(ord) = value_cmp(a, b) {
        return ord;
    }
    match value_rank(a).cmp(&value_rank(b)) {
        Ordering::Equal => a.to_string().cmp(&b.to_string()),
        other => other,
    }
}
