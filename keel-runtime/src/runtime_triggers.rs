//! Named row-level trigger subscriptions and their registry.
//!
//! Handlers are keyed by name. Subscribing under an existing name replaces the
//! previous handler in a single step under the registry's write lock, so a
//! concurrent statement sees either the old handler or the new one, never both
//! and never neither. Dispatch snapshots the matching handlers (in name order)
//! before firing, so handlers may subscribe or drop triggers themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_result::{Error, Result};
use keel_types::{Operation, RowChangeEvent, RowSnapshot};

use crate::runtime_transaction::Transaction;

/// When a trigger runs relative to the row write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerTiming {
    /// Runs before the row is written and may replace the new row.
    Before,
    /// Runs after every row of the statement has been written.
    After,
}

/// Subscription of a handler to row events on one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerSpec {
    pub name: String,
    pub table: String,
    pub events: Vec<Operation>,
    pub timing: TriggerTiming,
}

impl TriggerSpec {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        timing: TriggerTiming,
        events: impl IntoIterator<Item = Operation>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            events: events.into_iter().collect(),
            timing,
        }
    }

    #[inline]
    pub fn fires_on(&self, table: &str, timing: TriggerTiming, operation: Operation) -> bool {
        self.timing == timing && self.table == table && self.events.contains(&operation)
    }
}

/// What a handler asks the host to do with the row being written.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    /// Write the row as it is.
    Continue,
    /// Write this row instead. Only honored for BEFORE insert/update triggers.
    ReplaceRow(RowSnapshot),
}

/// Row-level trigger body.
///
/// Handlers run synchronously inside the writing transaction and may issue
/// further statements through `txn`. Returning an error aborts the
/// transaction.
pub trait TriggerHandler: Send + Sync {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome>;
}

impl<F> TriggerHandler for F
where
    F: Fn(&mut Transaction, &RowChangeEvent) -> Result<TriggerOutcome> + Send + Sync,
{
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        self(txn, event)
    }
}

#[derive(Clone)]
pub(crate) struct RegisteredTrigger {
    pub(crate) spec: TriggerSpec,
    pub(crate) handler: Arc<dyn TriggerHandler>,
}

impl fmt::Debug for RegisteredTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTrigger")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct TriggerRegistry {
    triggers: RwLock<BTreeMap<String, RegisteredTrigger>>,
}

impl TriggerRegistry {
    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, RegisteredTrigger>>> {
        self.triggers
            .read()
            .map_err(|_| Error::Internal("trigger registry read lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, RegisteredTrigger>>> {
        self.triggers
            .write()
            .map_err(|_| Error::Internal("trigger registry write lock poisoned".into()))
    }

    /// Insert or replace every trigger in `batch` under one write lock.
    pub(crate) fn upsert_all(&self, batch: Vec<RegisteredTrigger>) -> Result<()> {
        let mut guard = self.write()?;
        for trigger in batch {
            let replaced = guard.insert(trigger.spec.name.clone(), trigger);
            if let Some(old) = replaced {
                tracing::debug!(
                    "[TRIGGER] replaced name={} table={}",
                    old.spec.name,
                    old.spec.table
                );
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    pub(crate) fn specs(&self) -> Result<Vec<TriggerSpec>> {
        Ok(self.read()?.values().map(|t| t.spec.clone()).collect())
    }

    /// Handlers subscribed to `(table, timing, operation)`, in name order.
    pub(crate) fn matching(
        &self,
        table: &str,
        timing: TriggerTiming,
        operation: Operation,
    ) -> Result<Vec<RegisteredTrigger>> {
        Ok(self
            .read()?
            .values()
            .filter(|t| t.spec.fires_on(table, timing, operation))
            .cloned()
            .collect())
    }
}
