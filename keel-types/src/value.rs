//! Nullable scalar and array values stored in rows.
//!
//! Comparison helpers follow SQL semantics: `sql_eq` and `sql_cmp` return
//! `None` (UNKNOWN) when either side is NULL, while `is_distinct_from` is the
//! NULL-aware inequality used to decide whether a column changed.

use std::cmp::Ordering;
use std::fmt;

use keel_result::{Error, Result};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A nullable column value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Structured document. Objects compare by content, not key order.
    Json(JsonValue),
    Timestamp(OffsetDateTime),
    /// Array value. A multi-dimensional array nests arrays as elements.
    Array(Vec<Value>),
}

/// Canonical hashable form of a non-NULL value.
///
/// Used wherever set semantics are needed (duplicate detection, membership).
/// Integral floats collapse onto the integer key so `1` and `1.0` collide the
/// same way they compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Json(String),
    Timestamp(i128),
    Array(Vec<Option<ValueKey>>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Number of array dimensions, `None` for non-arrays.
    ///
    /// An empty array has zero dimensions.
    pub fn array_ndims(&self) -> Option<usize> {
        match self {
            Value::Array(items) if items.is_empty() => Some(0),
            Value::Array(items) => {
                let inner = items.iter().filter_map(Value::array_ndims).max();
                Some(1 + inner.unwrap_or(0))
            }
            _ => None,
        }
    }

    /// Three-valued ordering. `None` when either side is NULL or the types are
    /// not comparable.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Some(l.cmp(r)),
            (Value::Integer(l), Value::Float(r)) => (*l as f64).partial_cmp(r),
            (Value::Float(l), Value::Integer(r)) => l.partial_cmp(&(*r as f64)),
            (Value::Float(l), Value::Float(r)) => l.partial_cmp(r),
            (Value::Text(l), Value::Text(r)) => Some(l.cmp(r)),
            (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
            (Value::Timestamp(l), Value::Timestamp(r)) => Some(l.cmp(r)),
            _ => None,
        }
    }

    /// Three-valued equality. `None` (UNKNOWN) when either side is NULL.
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        match (self, other) {
            (Value::Json(l), Value::Json(r)) => Some(l == r),
            (Value::Array(_), Value::Array(_)) => Some(!self.is_distinct_from(other)),
            _ => Some(self.sql_cmp(other) == Some(Ordering::Equal)),
        }
    }

    /// NULL-aware inequality: true when the values differ or exactly one of
    /// them is NULL.
    pub fn is_distinct_from(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => false,
            (Value::Null, _) | (_, Value::Null) => true,
            (Value::Array(l), Value::Array(r)) => {
                l.len() != r.len() || l.iter().zip(r).any(|(a, b)| a.is_distinct_from(b))
            }
            _ => self.sql_eq(other) != Some(true),
        }
    }

    /// SQL `+`. NULL on either side yields NULL.
    pub fn checked_add(&self, other: &Value) -> Result<Value> {
        self.numeric_op(other, "add", i64::checked_add, |l, r| l + r)
    }

    /// SQL `-`. NULL on either side yields NULL.
    pub fn checked_sub(&self, other: &Value) -> Result<Value> {
        self.numeric_op(other, "subtract", i64::checked_sub, |l, r| l - r)
    }

    /// SQL `*`. NULL on either side yields NULL.
    pub fn checked_mul(&self, other: &Value) -> Result<Value> {
        self.numeric_op(other, "multiply", i64::checked_mul, |l, r| l * r)
    }

    pub fn checked_neg(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Integer(v) => v
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| Error::Arithmetic(format!("integer overflow negating {}", v))),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(Error::Arithmetic(format!(
                "cannot negate {} value",
                other.type_name()
            ))),
        }
    }

    /// True for numeric zero. NULL is not zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Integer(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            _ => false,
        }
    }

    fn numeric_op(
        &self,
        other: &Value,
        verb: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(l), Value::Integer(r)) => {
                int_op(*l, *r).map(Value::Integer).ok_or_else(|| {
                    Error::Arithmetic(format!("integer overflow trying to {} {} and {}", verb, l, r))
                })
            }
            (l, r) => match (l.as_f64(), r.as_f64()) {
                (Some(l), Some(r)) => Ok(Value::Float(float_op(l, r))),
                _ => Err(Error::Arithmetic(format!(
                    "cannot {} {} and {}",
                    verb,
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }

    /// Canonical key for set semantics. `None` for NULL.
    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Value::Null => None,
            Value::Boolean(v) => Some(ValueKey::Bool(*v)),
            Value::Integer(v) => Some(ValueKey::Int(*v)),
            Value::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64
                {
                    Some(ValueKey::Int(*v as i64))
                } else {
                    Some(ValueKey::Float(v.to_bits()))
                }
            }
            Value::Text(v) => Some(ValueKey::Str(v.clone())),
            Value::Json(v) => Some(ValueKey::Json(v.to_string())),
            Value::Timestamp(v) => Some(ValueKey::Timestamp(v.unix_timestamp_nanos())),
            Value::Array(items) => Some(ValueKey::Array(items.iter().map(Value::key).collect())),
        }
    }

    /// Render as a JSON value for audit change sets.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(v) => JsonValue::Bool(*v),
            Value::Integer(v) => JsonValue::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::Json(v) => v.clone(),
            Value::Timestamp(v) => JsonValue::String(format_timestamp(v)),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

fn format_timestamp(ts: &OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Timestamp(v) => f.write_str(&format_timestamp(v)),
            Value::Array(items) => {
                f.write_str("{")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_value!(Integer, i8, i16, i32, i64, u8, u16, u32);
impl_from_for_value!(Float, f32, f64);
impl_from_for_value!(Boolean, bool);
impl_from_for_value!(Text, String);
impl_from_for_value!(Json, JsonValue);
impl_from_for_value!(Timestamp, OffsetDateTime);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_comparisons_are_unknown() {
        assert_eq!(Value::Null.sql_eq(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).sql_cmp(&Value::Null), None);
        assert!(!Value::Null.is_distinct_from(&Value::Null));
        assert!(Value::Null.is_distinct_from(&Value::Integer(0)));
        assert!(Value::Integer(0).is_distinct_from(&Value::Null));
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Integer(3).sql_eq(&Value::Float(3.0)), Some(true));
        assert!(!Value::Integer(3).is_distinct_from(&Value::Float(3.0)));
        assert_eq!(Value::Integer(3).key(), Value::Float(3.0).key());
        assert_ne!(Value::Float(3.5).key(), Value::Integer(3).key());
    }

    #[test]
    fn float_keys_outside_i64_stay_floats() {
        let two_pow_63 = Value::Float(9.223372036854775808e18);
        assert_ne!(two_pow_63.key(), Value::Integer(i64::MAX).key());
        assert_eq!(
            Value::Float(i64::MIN as f64).key(),
            Value::Integer(i64::MIN).key()
        );
    }

    #[test]
    fn json_compares_structurally() {
        let a = Value::Json(json!({"a": 1, "b": [1, 2]}));
        let b = Value::Json(serde_json::from_str(r#"{"b":[1,2],"a":1}"#).expect("parse"));
        assert!(!a.is_distinct_from(&b));
        assert_eq!(a.key(), b.key());
        let c = Value::Json(json!({"a": 1, "b": [2, 1]}));
        assert!(a.is_distinct_from(&c));
    }

    #[test]
    fn array_dimensions() {
        assert_eq!(Value::from(Vec::<i64>::new()).array_ndims(), Some(0));
        assert_eq!(Value::from(vec![1, 2, 3]).array_ndims(), Some(1));
        let two_d = Value::Array(vec![
            Value::from(vec![1]),
            Value::from(vec![2]),
            Value::from(vec![3]),
        ]);
        assert_eq!(two_d.array_ndims(), Some(2));
        assert_eq!(Value::Integer(1).array_ndims(), None);
        assert_eq!(two_d.to_string(), "{{1},{2},{3}}");
    }

    #[test]
    fn arithmetic_propagates_null_and_detects_overflow() {
        assert_eq!(
            Value::Integer(2).checked_add(&Value::Integer(3)).expect("add"),
            Value::Integer(5)
        );
        assert_eq!(
            Value::Null.checked_add(&Value::Integer(3)).expect("add"),
            Value::Null
        );
        assert_eq!(
            Value::Integer(4).checked_mul(&Value::Float(0.5)).expect("mul"),
            Value::Float(2.0)
        );
        assert!(matches!(
            Value::Integer(i64::MAX).checked_add(&Value::Integer(1)),
            Err(Error::Arithmetic(_))
        ));
        assert!(matches!(
            Value::Text("a".into()).checked_sub(&Value::Integer(1)),
            Err(Error::Arithmetic(_))
        ));
    }

    #[test]
    fn converts_to_json() {
        let v = Value::from(vec![Value::Integer(1), Value::Null, Value::from("x")]);
        assert_eq!(v.to_json(), json!([1, null, "x"]));
        assert_eq!(Value::Float(f64::NAN).to_json(), JsonValue::Null);
    }
}
