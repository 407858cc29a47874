//! `updated_at`-style modification timestamps.

use std::sync::Arc;

use keel_result::{Error, Result};
use keel_runtime::{
    Engine, Transaction, TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming,
};
use keel_types::{Operation, RowChangeEvent, Value};

use crate::ensure_tables;

/// Timestamp rule definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampRule {
    pub table: String,
    pub column: String,
}

impl TimestampRule {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn trigger_name(&self) -> String {
        format!("pt_u_{}_{}", self.table, self.column)
    }
}

/// BEFORE insert/update handler stamping the transaction's logical now.
///
/// On insert the column is filled only when NULL. On update it is stamped
/// unless the statement itself set it to a different value, so an update that
/// changes nothing still moves the timestamp.
#[derive(Debug)]
struct TimestampStamper {
    name: String,
    column: String,
}

impl TriggerHandler for TimestampStamper {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        let Some(new) = event.new_row() else {
            return Ok(TriggerOutcome::Continue);
        };
        let stamp = match event.old_row() {
            Some(old) => !old.get(&self.column).is_distinct_from(new.get(&self.column)),
            None => new.get(&self.column).is_null(),
        };
        if !stamp {
            return Ok(TriggerOutcome::Continue);
        }
        tracing::trace!(
            "[TRIGGER] {} stamps {}={}",
            self.name,
            self.column,
            txn.now()
        );
        Ok(TriggerOutcome::ReplaceRow(
            new.with(self.column.as_str(), Value::Timestamp(txn.now())),
        ))
    }
}

/// Install (or replace) a timestamp rule. Returns the trigger name.
pub fn define_timestamp_rule(engine: &Engine, rule: TimestampRule) -> Result<String> {
    ensure_tables(engine, &[rule.table.as_str()])?;
    if rule.column.is_empty() {
        return Err(Error::configuration("timestamp column must not be empty"));
    }
    let name = rule.trigger_name();
    engine.subscribe(
        TriggerSpec::new(
            name.clone(),
            rule.table,
            TriggerTiming::Before,
            [Operation::Insert, Operation::Update],
        ),
        Arc::new(TimestampStamper {
            name: name.clone(),
            column: rule.column,
        }),
    )?;
    Ok(name)
}
