//! Consistency rules that react to row changes on a keel [`Engine`].
//!
//! Every rule is installed as one or two named trigger handlers and runs
//! synchronously inside the transaction that changed the row, so its effects
//! commit or roll back together with that change:
//!
//! - [`define_counter_cache`] / [`define_sum_cache`]: denormalized aggregates
//! - [`define_conditional_foreign_key`]: NULL-tolerant scalar foreign keys
//! - [`define_array_foreign_key`]: foreign keys held in an array column
//! - [`define_audit_rule`]: append-only history of updates and deletes
//! - [`define_timestamp_rule`]: `updated_at` maintenance
//!
//! Defining a rule under a name that is already installed replaces it in one
//! step; [`drop_rule`] removes it.
#![forbid(unsafe_code)]

mod aggregate;
mod array_foreign_key;
mod audit;
mod foreign_key;
mod qualify;
mod timestamp;

pub use aggregate::{CounterCache, SumCache, define_counter_cache, define_sum_cache};
pub use array_foreign_key::{ArrayForeignKey, define_array_foreign_key};
pub use audit::{
    AuditEntry, AuditRule, DEFAULT_AUDIT_TABLE, audit_entries, create_audit_table,
    define_audit_rule,
};
pub use foreign_key::{ConditionalForeignKey, define_conditional_foreign_key};
pub use qualify::Qualifier;
pub use timestamp::{TimestampRule, define_timestamp_rule};

use keel_result::{Error, Result};
use keel_runtime::Engine;

/// Remove the rule handler installed under `name`. Returns whether it existed.
///
/// Foreign keys install two handlers; drop each by its own name.
pub fn drop_rule(engine: &Engine, name: &str) -> Result<bool> {
    engine.drop_trigger(name)
}

pub(crate) fn ensure_tables(engine: &Engine, tables: &[&str]) -> Result<()> {
    match tables.iter().find(|t| !engine.has_table(t)) {
        Some(missing) => Err(Error::ConfigurationError(format!(
            "rule references unknown table {}",
            missing
        ))),
        None => Ok(()),
    }
}

/// Referenced columns must be declared keys of their table, so that changing
/// them takes the lock that conflicts with the referencing side's KEY SHARE.
pub(crate) fn ensure_key_columns(engine: &Engine, table: &str, columns: &[String]) -> Result<()> {
    let def = engine.table_def(table)?;
    match columns.iter().find(|c| !def.is_key_column(c)) {
        Some(column) => Err(Error::ConfigurationError(format!(
            "foreign key references {}.{}, which is not a key column of {}",
            table, column, table
        ))),
        None => Ok(()),
    }
}
