//! Counter and sum caches.
//!
//! Both keep a column of a target table equal to an aggregate over the source
//! rows that refer to it:
//!
//! - counter cache: `target.column = increment × count(qualifying sources)`
//! - sum cache: `target.column = multiplier × sum(qualifying sources.summed)`
//!
//! The handler runs AFTER each source row change and applies a delta with
//! `column = column + delta` under the target row's lock, so concurrent writers
//! serialize on the target instead of overwriting each other.

use std::sync::Arc;

use keel_expr::{Expr, Relationship};
use keel_result::{Error, Result};
use keel_runtime::{
    Assignment, Engine, Transaction, TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming,
};
use keel_types::{Operation, RowChangeEvent, RowSnapshot, Value};

use crate::ensure_tables;
use crate::qualify::Qualifier;

/// Counter cache definition.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterCache {
    /// Trigger name; defaults to `pt_cc_{target_table}_{target_column}`.
    pub name: Option<String>,
    pub target_table: String,
    pub target_column: String,
    pub source_table: String,
    pub relationship: Relationship,
    /// Amount added per qualifying source row.
    pub increment: i64,
    /// Only source rows for which this evaluates to TRUE are counted.
    pub predicate: Option<Expr<String>>,
}

impl CounterCache {
    pub fn new(
        target_table: impl Into<String>,
        target_column: impl Into<String>,
        source_table: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            name: None,
            target_table: target_table.into(),
            target_column: target_column.into(),
            source_table: source_table.into(),
            relationship,
            increment: 1,
            predicate: None,
        }
    }

    pub fn with_increment(mut self, increment: i64) -> Self {
        self.increment = increment;
        self
    }

    pub fn with_predicate(mut self, predicate: Expr<String>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn trigger_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!("pt_cc_{}_{}", self.target_table, self.target_column)
        })
    }
}

/// Sum cache definition.
#[derive(Clone, Debug, PartialEq)]
pub struct SumCache {
    /// Trigger name; defaults to `pt_sc_{target_table}_{target_column}`.
    pub name: Option<String>,
    pub target_table: String,
    pub target_column: String,
    pub source_table: String,
    pub summed_column: String,
    pub relationship: Relationship,
    pub multiplier: i64,
    pub predicate: Option<Expr<String>>,
}

impl SumCache {
    pub fn new(
        target_table: impl Into<String>,
        target_column: impl Into<String>,
        source_table: impl Into<String>,
        summed_column: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            name: None,
            target_table: target_table.into(),
            target_column: target_column.into(),
            source_table: source_table.into(),
            summed_column: summed_column.into(),
            relationship,
            multiplier: 1,
            predicate: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_predicate(mut self, predicate: Expr<String>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn trigger_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("pt_sc_{}_{}", self.target_table, self.target_column))
    }
}

#[derive(Clone, Debug, PartialEq)]
enum DeltaSource {
    Constant(Value),
    Column { column: String, multiplier: Value },
}

/// Installed aggregate handler. Immutable once subscribed; redefining the rule
/// swaps in a new handler.
#[derive(Debug)]
pub(crate) struct AggregateRule {
    name: String,
    target_table: String,
    target_column: String,
    qualifier: Qualifier,
    delta: DeltaSource,
}

impl AggregateRule {
    /// Delta contributed by one qualifying row version.
    fn delta(&self, row: &RowSnapshot) -> Result<Value> {
        match &self.delta {
            DeltaSource::Constant(v) => Ok(v.clone()),
            DeltaSource::Column { column, multiplier } => {
                summed_value(row, column).checked_mul(multiplier)
            }
        }
    }

    fn apply(&self, txn: &mut Transaction, source: &RowSnapshot, delta: Value) -> Result<()> {
        if delta.is_zero() || delta.is_null() {
            return Ok(());
        }
        let Some(filter) = self.qualifier.relationship().filter_for(source) else {
            return Ok(());
        };
        let touched = txn.update(
            &self.target_table,
            &filter,
            &[Assignment::increment(&self.target_column, delta.clone())],
        )?;
        tracing::trace!(
            "[TRIGGER] {} delta={} target={} rows={}",
            self.name,
            delta,
            self.target_table,
            touched
        );
        Ok(())
    }

    fn on_update(&self, txn: &mut Transaction, old: &RowSnapshot, new: &RowSnapshot) -> Result<()> {
        let q_old = self.qualifier.qualifies(old);
        let q_new = self.qualifier.qualifies(new);
        if self.qualifier.relationship().changed(old, new) || q_old != q_new {
            // Two separate statements even when old and new hit the same target.
            if q_old {
                let delta = self.delta(old)?.checked_neg()?;
                self.apply(txn, old, delta)?;
            }
            if q_new {
                let delta = self.delta(new)?;
                self.apply(txn, new, delta)?;
            }
            return Ok(());
        }
        if let DeltaSource::Column { column, multiplier } = &self.delta
            && q_new
            && old.get(column).is_distinct_from(new.get(column))
        {
            let delta = summed_value(new, column)
                .checked_sub(&summed_value(old, column))?
                .checked_mul(multiplier)?;
            self.apply(txn, new, delta)?;
        }
        Ok(())
    }
}

/// Summed column value, with NULL contributing nothing.
fn summed_value(row: &RowSnapshot, column: &str) -> Value {
    match row.get(column) {
        Value::Null => Value::Integer(0),
        v => v.clone(),
    }
}

impl TriggerHandler for AggregateRule {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        match (event.operation(), event.old_row(), event.new_row()) {
            (Operation::Insert, _, Some(new)) => {
                if self.qualifier.qualifies(new) {
                    let delta = self.delta(new)?;
                    self.apply(txn, new, delta)?;
                }
            }
            (Operation::Delete, Some(old), _) => {
                if self.qualifier.qualifies(old) {
                    let delta = self.delta(old)?.checked_neg()?;
                    self.apply(txn, old, delta)?;
                }
            }
            (Operation::Update, Some(old), Some(new)) => self.on_update(txn, old, new)?,
            (op, _, _) => {
                return Err(Error::Internal(format!(
                    "{} received a malformed {} event",
                    self.name, op
                )));
            }
        }
        Ok(TriggerOutcome::Continue)
    }
}

fn subscribe(engine: &Engine, source_table: &str, rule: AggregateRule) -> Result<String> {
    let name = rule.name.clone();
    ensure_tables(engine, &[source_table, rule.target_table.as_str()])?;
    if rule.target_column.is_empty() {
        return Err(Error::configuration("aggregate target column must not be empty"));
    }
    tracing::debug!(
        "[TRIGGER] define aggregate name={} source={} target={}.{}",
        name,
        source_table,
        rule.target_table,
        rule.target_column
    );
    engine.subscribe(
        TriggerSpec::new(name.clone(), source_table, TriggerTiming::After, Operation::ALL),
        Arc::new(rule),
    )?;
    Ok(name)
}

/// Install (or replace) a counter cache. Returns the trigger name.
pub fn define_counter_cache(engine: &Engine, def: CounterCache) -> Result<String> {
    let name = def.trigger_name();
    let rule = AggregateRule {
        name,
        target_table: def.target_table,
        target_column: def.target_column,
        qualifier: Qualifier::new(def.relationship, def.predicate),
        delta: DeltaSource::Constant(Value::Integer(def.increment)),
    };
    subscribe(engine, &def.source_table, rule)
}

/// Install (or replace) a sum cache. Returns the trigger name.
pub fn define_sum_cache(engine: &Engine, def: SumCache) -> Result<String> {
    if def.summed_column.is_empty() {
        return Err(Error::configuration("summed column must not be empty"));
    }
    let name = def.trigger_name();
    let rule = AggregateRule {
        name,
        target_table: def.target_table,
        target_column: def.target_column,
        qualifier: Qualifier::new(def.relationship, def.predicate),
        delta: DeltaSource::Column {
            column: def.summed_column,
            multiplier: Value::Integer(def.multiplier),
        },
    };
    subscribe(engine, &def.source_table, rule)
}
