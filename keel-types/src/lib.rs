//! Value, row and event types shared across keel crates.
//!
//! These live in their own crate so the expression layer, the storage host and
//! the rules can agree on one representation without depending on each other.

pub mod event;
pub mod ids;
pub mod row;
pub mod value;

pub use event::{Operation, RowChangeEvent};
pub use ids::{RowId, TxnId};
pub use row::RowSnapshot;
pub use value::{Value, ValueKey};

/// Build a [`RowSnapshot`] from `column => value` pairs.
///
/// ```
/// use keel_types::{row, Value};
///
/// let r = row! { "id" => 1, "label" => "a", "parent_id" => Value::Null };
/// assert_eq!(r.get("id"), &Value::Integer(1));
/// assert!(r.get("parent_id").is_null());
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::RowSnapshot::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {
        $crate::RowSnapshot::from_pairs(vec![
            $(($column.to_string(), $crate::Value::from($value))),+
        ])
    };
}
