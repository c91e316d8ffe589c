//! Total ordering wrapper for JSON index keys.

use common::value::{value_rank, value_total_cmp};
use serde_json::Value;
use std::cmp::Ordering;

/// A JSON value with a total order: Null < Bool < Number < String, numbers
/// compared as f64, arrays/objects ordered last by serialization.
#[derive(Clone, Debug)]
pub struct IndexKey(Value);

impl IndexKey {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn rank(&self) -> u8 {
        value_rank(&self.0)
    }
}

impl From<Value> for IndexKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        value_total_cmp(&self.0, &other.0)
    }
}
