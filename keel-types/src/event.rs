//! Row change events delivered to rule handlers.

use std::fmt;

use crate::row::RowSnapshot;

/// The kind of row mutation that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    /// Lowercase name, as used in violation messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Rows {
    Insert(RowSnapshot),
    Update(RowSnapshot, RowSnapshot),
    Delete(RowSnapshot),
}

/// One affected row of one statement.
///
/// The old row is present exactly for updates and deletes, the new row exactly
/// for inserts and updates. The constructors are the only way to build an
/// event, so the pairing cannot be violated.
#[derive(Clone, Debug, PartialEq)]
pub struct RowChangeEvent {
    table: String,
    rows: Rows,
}

impl RowChangeEvent {
    pub fn insert(table: impl Into<String>, new_row: RowSnapshot) -> Self {
        Self {
            table: table.into(),
            rows: Rows::Insert(new_row),
        }
    }

    pub fn update(table: impl Into<String>, old_row: RowSnapshot, new_row: RowSnapshot) -> Self {
        Self {
            table: table.into(),
            rows: Rows::Update(old_row, new_row),
        }
    }

    pub fn delete(table: impl Into<String>, old_row: RowSnapshot) -> Self {
        Self {
            table: table.into(),
            rows: Rows::Delete(old_row),
        }
    }

    #[inline]
    pub fn operation(&self) -> Operation {
        match self.rows {
            Rows::Insert(_) => Operation::Insert,
            Rows::Update(..) => Operation::Update,
            Rows::Delete(_) => Operation::Delete,
        }
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn old_row(&self) -> Option<&RowSnapshot> {
        match &self.rows {
            Rows::Insert(_) => None,
            Rows::Update(old, _) | Rows::Delete(old) => Some(old),
        }
    }

    pub fn new_row(&self) -> Option<&RowSnapshot> {
        match &self.rows {
            Rows::Insert(new) | Rows::Update(_, new) => Some(new),
            Rows::Delete(_) => None,
        }
    }

    /// Replace the new row. Deletes have no new row and are returned unchanged.
    pub fn with_new_row(self, new_row: RowSnapshot) -> Self {
        let rows = match self.rows {
            Rows::Insert(_) => Rows::Insert(new_row),
            Rows::Update(old, _) => Rows::Update(old, new_row),
            delete @ Rows::Delete(_) => delete,
        };
        Self {
            table: self.table,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn row_presence_follows_operation() {
        let insert = RowChangeEvent::insert("t", row! { "id" => 1 });
        assert_eq!(insert.operation(), Operation::Insert);
        assert!(insert.old_row().is_none());
        assert!(insert.new_row().is_some());

        let update = RowChangeEvent::update("t", row! { "id" => 1 }, row! { "id" => 2 });
        assert_eq!(update.operation(), Operation::Update);
        assert!(update.old_row().is_some() && update.new_row().is_some());

        let delete = RowChangeEvent::delete("t", row! { "id" => 1 });
        assert_eq!(delete.operation(), Operation::Delete);
        assert!(delete.old_row().is_some());
        assert!(delete.new_row().is_none());
        assert_eq!(delete.table(), "t");
    }

    #[test]
    fn with_new_row_keeps_old_row() {
        let update = RowChangeEvent::update("t", row! { "v" => 1 }, row! { "v" => 2 });
        let replaced = update.with_new_row(row! { "v" => 3 });
        assert_eq!(replaced.old_row(), Some(&row! { "v" => 1 }));
        assert_eq!(replaced.new_row(), Some(&row! { "v" => 3 }));
        assert_eq!(Operation::Delete.to_string(), "delete");
    }
}
