//! Coerces raw input into the canonical shape of a logical file.
//!
//! Normalization never fails. Anything that does not fit the declared shape
//! is replaced by the empty default for that field.

use serde_json::{json, Map, Value};

use crate::registry::{LogicalFile, Shape};
use crate::IDENTITY_FIELD;

/// The document a logical file holds before anything has been written.
pub fn empty_default(file: LogicalFile) -> Value {
    match file.shape() {
        Shape::List { field } => json!({ field: [] }),
        Shape::Text { field } => json!({ field: "" }),
        Shape::Mapping => Value::Object(Map::new()),
    }
}

/// Returns `raw` in the canonical shape of `file`.
pub fn normalize(file: LogicalFile, raw: &Value) -> Value {
    match file.shape() {
        Shape::List { field } => {
            let items = raw
                .get(field)
                .filter(|v| v.is_array())
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            json!({ field: items })
        }
        Shape::Text { field } => {
            let text = raw
                .get(field)
                .filter(|v| v.is_string())
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            json!({ field: text })
        }
        Shape::Mapping => match raw {
            Value::Object(map) => {
                let mut map = map.clone();
                map.remove(IDENTITY_FIELD);
                Value::Object(map)
            }
            _ => Value::Object(Map::new()),
        },
    }
}

/// Number of records in a document: the sum of its array lengths, plus one
/// for each other non-empty value.
pub fn record_count(doc: &Value) -> usize {
    match doc {
        Value::Object(map) => map
            .values()
            .map(|v| match v {
                Value::Array(items) => items.len(),
                Value::Null => 0,
                Value::String(s) if s.is_empty() => 0,
                Value::Object(o) if o.is_empty() => 0,
                _ => 1,
            })
            .sum(),
        _ => 0,
    }
}
