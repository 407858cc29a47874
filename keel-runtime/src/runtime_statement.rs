//! Column assignments used by UPDATE statements.

use keel_result::Result;
use keel_types::{RowSnapshot, Value};

/// One `SET` clause of an update.
#[derive(Clone, Debug, PartialEq)]
pub enum Assignment {
    /// `column = value`
    Set(String, Value),
    /// `column = column + delta`, evaluated against the locked row version.
    Increment(String, Value),
}

impl Assignment {
    pub fn set(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Assignment::Set(column.into(), value.into())
    }

    pub fn increment(column: impl Into<String>, delta: impl Into<Value>) -> Self {
        Assignment::Increment(column.into(), delta.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Assignment::Set(c, _) | Assignment::Increment(c, _) => c,
        }
    }
}

/// Apply `assignments` to `current`. Every right-hand side reads `current`,
/// not the partially assigned row.
pub(crate) fn apply_assignments(
    current: &RowSnapshot,
    assignments: &[Assignment],
) -> Result<RowSnapshot> {
    let mut computed = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let value = match assignment {
            Assignment::Set(_, v) => v.clone(),
            Assignment::Increment(c, delta) => {
                let base = current.get(c);
                if base.is_null() && !delta.is_null() {
                    tracing::warn!("[UPDATE] increment of NULL column {} leaves it NULL", c);
                }
                base.checked_add(delta)?
            }
        };
        computed.push((assignment.column().to_string(), value));
    }
    Ok(current.merged(&RowSnapshot::from_pairs(computed)))
}
