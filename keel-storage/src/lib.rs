//! Row storage for the keel host.
//!
//! Tables are schema-light: a row is any [`RowSnapshot`](keel_types::RowSnapshot)
//! and missing columns read as NULL. Each stored row keeps its last committed
//! version plus at most one pending version written by the transaction that
//! holds the row's write lock. Readers other than that transaction keep seeing
//! the committed version until [`MemStore::commit`] promotes the pending one.

pub mod store;
pub mod table;

pub use store::MemStore;
pub use table::TableDef;
