//! Transaction bookkeeping and row locking for keel.
//!
//! # Key Concepts
//!
//! - **Transaction ID ([`TxnId`])**: Unique 64-bit identifier for each transaction
//! - **Transaction Snapshot ([`TransactionSnapshot`])**: The allocated id plus the
//!   logical "now" every rule in the transaction observes
//! - **Row locks ([`LockManager`])**: Four lock strengths with the usual
//!   relational conflict matrix, held until the transaction finishes
//!
//! Ids start at 1 and are allocated by [`TxnIdManager`]; `u64::MAX` is
//! reserved.
//!
//! # Lock Waits
//!
//! A request that conflicts with a lock held by another transaction blocks
//! until the holder releases or the caller's timeout elapses, in which case
//! [`Error::LockTimeout`](keel_result::Error::LockTimeout) is returned. Deadlocks
//! are resolved the same way: one of the waiters times out.
pub mod lock;
pub mod mvcc;

pub use keel_types::TxnId;
pub use lock::{LockManager, LockMode};
pub use mvcc::{TransactionSnapshot, TxnIdManager};
