//! Transactional host for keel rules.
//!
//! The runtime owns the tables, hands out transactions, and delivers one
//! [`RowChangeEvent`](keel_types::RowChangeEvent) per affected row to every
//! trigger subscribed on the table, synchronously and inside the writing
//! transaction.
//!
//! - [`Engine`]: shared handle; creates tables, begins transactions, manages
//!   trigger subscriptions
//! - [`Transaction`]: `insert`, `update`, `delete`, `select`, `select_for`,
//!   `commit`, `rollback`
//! - [`TriggerHandler`]: the callback a rule implements
#![forbid(unsafe_code)]

mod runtime_config;
mod runtime_engine;
mod runtime_statement;
mod runtime_transaction;
mod runtime_triggers;

pub use runtime_config::{DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_TRIGGER_DEPTH, EngineConfig};
pub use runtime_engine::Engine;
pub use runtime_statement::Assignment;
pub use runtime_transaction::Transaction;
pub use runtime_triggers::{TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming};

pub use keel_storage::TableDef;
pub use keel_transaction::LockMode;

pub type Result<T> = keel_result::Result<T>;
