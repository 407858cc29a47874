//! Identifiers shared across keel crates.

/// Store-assigned identifier of a row within its table.
///
/// Row ids are allocated monotonically per table and never reused, so ordering
/// by row id is insertion order.
pub type RowId = u64;

/// Transaction identifier, allocated monotonically by the transaction manager.
pub type TxnId = u64;
