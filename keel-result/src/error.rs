use std::fmt;
use thiserror::Error;

/// Which structural rule a foreign key array broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayShapeKind {
    /// The array has more than one dimension.
    MultiDimensional,
    /// The same element appears more than once.
    DuplicateEntry,
}

impl fmt::Display for ArrayShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayShapeKind::MultiDimensional => f.write_str("multi-dimensional"),
            ArrayShapeKind::DuplicateEntry => f.write_str("duplicate entry"),
        }
    }
}

/// Unified error type for all keel operations.
///
/// Rule violations carry the operation (`insert`, `update`, `delete`), the
/// table the mutation targeted and the name of the rule that rejected it, so
/// callers can match on them without parsing messages. The rendered message is
/// kept alongside for display.
#[derive(Error, Debug)]
pub enum Error {
    /// A referential rule rejected the mutation.
    ///
    /// Raised by:
    /// - the parent side of a scalar foreign key (a referenced key is updated
    ///   or deleted while children still point at it)
    /// - the child side of a scalar foreign key (a complete key points at no
    ///   parent)
    /// - either side of an array foreign key (a missing entry, or an entry
    ///   that is still referenced)
    ///
    /// Fatal to the enclosing transaction.
    #[error("{message}")]
    ConstraintViolation {
        operation: String,
        table: String,
        constraint: String,
        message: String,
    },

    /// A foreign key array has the wrong shape.
    ///
    /// Distinguished from [`Error::ConstraintViolation`] so callers can tell a
    /// malformed row apart from a dangling reference. Fatal to the enclosing
    /// transaction.
    #[error("{message}")]
    ArrayShapeViolation {
        operation: String,
        table: String,
        constraint: String,
        kind: ArrayShapeKind,
        message: String,
    },

    /// A rule definition is malformed.
    ///
    /// Raised at registration time (empty relationship, mismatched key arity,
    /// duplicated column, unknown table), before any event is processed.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Referenced table does not exist in the store.
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// A table with the same name was already created.
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Invalid caller input, such as a malformed row or an unsupported value.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Numeric overflow or a type mismatch during delta arithmetic.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// A row lock could not be acquired before the configured timeout.
    ///
    /// The enclosing transaction is aborted; retrying is the caller's call.
    #[error("lock timeout on table '{table}' row {row_id} after {waited_ms} ms")]
    LockTimeout {
        table: String,
        row_id: u64,
        waited_ms: u64,
    },

    /// The transaction already failed and only accepts a rollback.
    #[error("transaction {0} is aborted, commands ignored until rollback")]
    TransactionAborted(u64),

    /// Invalid transaction state transition.
    #[error("{0}")]
    TransactionContextError(String),

    /// Trigger-issued writes cascaded deeper than the configured limit.
    #[error("trigger cascade exceeded maximum depth of {0}")]
    TriggerDepthExceeded(usize),

    /// Violated internal invariant. Indicates a bug.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Build the violation raised by either side of a scalar foreign key.
    ///
    /// ```
    /// use keel_result::Error;
    ///
    /// let err = Error::foreign_key_violation("delete", "parents", "pt_cfk_parents_id");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "delete in parents violates foreign key constraint \"pt_cfk_parents_id\""
    /// );
    /// ```
    pub fn foreign_key_violation(
        operation: impl Into<String>,
        table: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let table = table.into();
        let constraint = constraint.into();
        let message = format!(
            "{} in {} violates foreign key constraint \"{}\"",
            operation, table, constraint
        );
        Error::ConstraintViolation {
            operation,
            table,
            constraint,
            message,
        }
    }

    /// Build a reference violation with a caller-supplied message.
    pub fn reference_violation(
        operation: impl Into<String>,
        table: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::ConstraintViolation {
            operation: operation.into(),
            table: table.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Build an array shape violation.
    pub fn array_shape_violation(
        operation: impl Into<String>,
        table: impl Into<String>,
        constraint: impl Into<String>,
        kind: ArrayShapeKind,
        message: impl Into<String>,
    ) -> Self {
        Error::ArrayShapeViolation {
            operation: operation.into(),
            table: table.into(),
            constraint: constraint.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error from any displayable value.
    #[inline]
    pub fn configuration<E: fmt::Display>(err: E) -> Self {
        Error::ConfigurationError(err.to_string())
    }

    /// Name of the rule that rejected the mutation, if this is a rule violation.
    pub fn constraint_name(&self) -> Option<&str> {
        match self {
            Error::ConstraintViolation { constraint, .. }
            | Error::ArrayShapeViolation { constraint, .. } => Some(constraint),
            _ => None,
        }
    }

    /// True for errors raised by a rule rejecting a mutation.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Error::ConstraintViolation { .. } | Error::ArrayShapeViolation { .. }
        )
    }
}
