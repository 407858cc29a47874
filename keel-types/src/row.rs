//! Immutable row snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::value::Value;

static NULL_VALUE: Value = Value::Null;

/// An immutable mapping from column name to value, captured at the moment of
/// an event.
///
/// Clones share storage. A column that is not present reads as NULL, which is
/// how the host treats columns a statement never mentioned. Columns iterate in
/// name order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSnapshot {
    values: Arc<BTreeMap<String, Value>>,
}

impl RowSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            values: Arc::new(values),
        }
    }

    /// Value of `column`, NULL when absent.
    #[inline]
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL_VALUE)
    }

    /// True when the column is present, even if its value is NULL.
    #[inline]
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Values of `columns`, in order.
    pub fn project(&self, columns: &[String]) -> Vec<Value> {
        columns.iter().map(|c| self.get(c).clone()).collect()
    }

    /// True when every listed column holds a non-NULL value.
    pub fn all_present(&self, columns: &[String]) -> bool {
        columns.iter().all(|c| !self.get(c).is_null())
    }

    /// A copy of this snapshot with `column` set to `value`.
    pub fn with(&self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut values = (*self.values).clone();
        values.insert(column.into(), value.into());
        Self {
            values: Arc::new(values),
        }
    }

    /// A copy of this snapshot overlaid with every column of `other`.
    pub fn merged(&self, other: &RowSnapshot) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut values = (*self.values).clone();
        for (k, v) in other.iter() {
            values.insert(k.to_string(), v.clone());
        }
        Self {
            values: Arc::new(values),
        }
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let map: JsonMap<String, JsonValue> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl<K, V> FromIterator<(K, V)> for RowSnapshot
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter.into_iter().map(|(k, v)| (k, v.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn missing_columns_read_as_null() {
        let r = row! { "id" => 1 };
        assert!(r.get("other").is_null());
        assert!(!r.contains("other"));
        assert!(r.contains("id"));
    }

    #[test]
    fn with_leaves_original_untouched() {
        let original = row! { "id" => 1, "count" => 0 };
        let changed = original.with("count", 5);
        assert_eq!(original.get("count"), &Value::Integer(0));
        assert_eq!(changed.get("count"), &Value::Integer(5));
        assert_eq!(changed.get("id"), &Value::Integer(1));
    }

    #[test]
    fn merged_overrides_columns() {
        let base = row! { "a" => 1, "b" => 2 };
        let overlay = row! { "b" => 3, "c" => Value::Null };
        let merged = base.merged(&overlay);
        assert_eq!(merged.project(&["a".into(), "b".into(), "c".into()]), vec![
            Value::Integer(1),
            Value::Integer(3),
            Value::Null
        ]);
        assert!(!merged.all_present(&["a".into(), "c".into()]));
    }
}
