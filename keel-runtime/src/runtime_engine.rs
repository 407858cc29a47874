use std::sync::Arc;

use keel_result::{Error, Result};
use keel_storage::{MemStore, TableDef};
use keel_transaction::{LockManager, TxnIdManager};
use time::OffsetDateTime;

use crate::runtime_config::EngineConfig;
use crate::runtime_transaction::Transaction;
use crate::runtime_triggers::{RegisteredTrigger, TriggerHandler, TriggerRegistry, TriggerSpec};

pub(crate) struct EngineInner {
    pub(crate) store: MemStore,
    pub(crate) txn_manager: TxnIdManager,
    pub(crate) locks: LockManager,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) config: EngineConfig,
}

/// Shared handle to one in-memory database.
///
/// Cloning is cheap and every clone sees the same tables, triggers and locks,
/// so an engine can be handed to several threads that each run their own
/// transactions.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        tracing::debug!(
            "[ENGINE] new lock_timeout_ms={} max_trigger_depth={}",
            config.lock_timeout.as_millis(),
            config.max_trigger_depth
        );
        Self {
            inner: Arc::new(EngineInner {
                store: MemStore::new(),
                txn_manager: TxnIdManager::new(),
                locks: LockManager::new(),
                triggers: TriggerRegistry::default(),
                config,
            }),
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn create_table(&self, def: TableDef) -> Result<()> {
        self.inner.store.create_table(def)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.inner.store.has_table(name)
    }

    pub fn table_def(&self, name: &str) -> Result<TableDef> {
        self.inner.store.table_def(name)
    }

    /// Start a transaction whose logical "now" is the current time.
    pub fn begin(&self) -> Result<Transaction> {
        let snapshot = self.inner.txn_manager.begin_transaction()?;
        Ok(Transaction::new(self.clone(), snapshot))
    }

    /// Start a transaction with a fixed logical "now".
    pub fn begin_at(&self, now: OffsetDateTime) -> Result<Transaction> {
        let snapshot = self.inner.txn_manager.begin_transaction_at(now)?;
        Ok(Transaction::new(self.clone(), snapshot))
    }

    /// Run `f` in a fresh transaction, committing on success and rolling back
    /// on error.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    tracing::warn!(
                        "[ENGINE] rollback after error failed: {} (original: {})",
                        rollback_err,
                        err
                    );
                }
                Err(err)
            }
        }
    }

    /// Subscribe `handler` under `spec.name`, replacing any trigger of the
    /// same name.
    pub fn subscribe(&self, spec: TriggerSpec, handler: Arc<dyn TriggerHandler>) -> Result<()> {
        self.subscribe_all(vec![(spec, handler)])
    }

    /// Subscribe several handlers as one step. Either all are installed or,
    /// on a validation error, none are.
    pub fn subscribe_all(&self, batch: Vec<(TriggerSpec, Arc<dyn TriggerHandler>)>) -> Result<()> {
        let mut registered = Vec::with_capacity(batch.len());
        for (spec, handler) in batch {
            if spec.name.is_empty() {
                return Err(Error::configuration("trigger name must not be empty"));
            }
            if spec.events.is_empty() {
                return Err(Error::ConfigurationError(format!(
                    "trigger {} subscribes to no events",
                    spec.name
                )));
            }
            if !self.has_table(&spec.table) {
                return Err(Error::ConfigurationError(format!(
                    "trigger {} targets unknown table {}",
                    spec.name, spec.table
                )));
            }
            tracing::debug!(
                "[TRIGGER] subscribe name={} table={} timing={:?} events={:?}",
                spec.name,
                spec.table,
                spec.timing,
                spec.events
            );
            registered.push(RegisteredTrigger { spec, handler });
        }
        self.inner.triggers.upsert_all(registered)
    }

    /// Remove the trigger named `name`. Returns whether it existed.
    pub fn drop_trigger(&self, name: &str) -> Result<bool> {
        let removed = self.inner.triggers.remove(name)?;
        tracing::debug!("[TRIGGER] drop name={} existed={}", name, removed);
        Ok(removed)
    }

    /// Every subscribed trigger, in name order.
    pub fn triggers(&self) -> Result<Vec<TriggerSpec>> {
        self.inner.triggers.specs()
    }

    /// Triggers subscribed on `table`, in name order.
    pub fn triggers_on(&self, table: &str) -> Result<Vec<TriggerSpec>> {
        Ok(self
            .triggers()?
            .into_iter()
            .filter(|spec| spec.table == table)
            .collect())
    }
}
