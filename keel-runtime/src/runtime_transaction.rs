//! Statement execution inside one transaction.
//!
//! Every write goes through the same path regardless of whether the caller is
//! application code or a trigger handler:
//!
//! 1. find candidate rows visible to this transaction
//! 2. lock each row (`Exclusive` for deletes and key changes, `NoKeyExclusive`
//!    otherwise), then re-read it and re-check the filter
//! 3. fire BEFORE triggers, which may replace the new row
//! 4. write the pending version
//! 5. once every row of the statement is written, fire AFTER triggers per row
//!
//! A failing statement marks the transaction aborted. Further statements are
//! refused until the caller rolls back.

use keel_expr::Expr;
use keel_result::{Error, Result};
use keel_storage::TableDef;
use keel_transaction::{LockMode, TransactionSnapshot, TxnId};
use keel_types::{RowChangeEvent, RowId, RowSnapshot};
use time::OffsetDateTime;

use crate::runtime_engine::Engine;
use crate::runtime_statement::{Assignment, apply_assignments};
use crate::runtime_triggers::{TriggerOutcome, TriggerTiming};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Active,
    Aborted,
    Committed,
    RolledBack,
}

/// A unit of work against an [`Engine`].
///
/// Dropping an unfinished transaction rolls it back.
pub struct Transaction {
    engine: Engine,
    snapshot: TransactionSnapshot,
    state: TxnState,
    depth: usize,
}

impl Transaction {
    pub(crate) fn new(engine: Engine, snapshot: TransactionSnapshot) -> Self {
        Self {
            engine,
            snapshot,
            state: TxnState::Active,
            depth: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> TxnId {
        self.snapshot.txn_id
    }

    /// Logical "now" of this transaction. Constant for its whole lifetime.
    #[inline]
    pub fn now(&self) -> OffsetDateTime {
        self.snapshot.started_at
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TxnState::Aborted
    }

    /// Current nesting of trigger activations; zero for caller statements.
    pub fn trigger_depth(&self) -> usize {
        self.depth
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Aborted => Err(Error::TransactionAborted(self.id())),
            TxnState::Committed | TxnState::RolledBack => Err(Error::TransactionContextError(
                format!("transaction {} is no longer active", self.id()),
            )),
        }
    }

    /// Run one statement, aborting the transaction if it fails.
    fn statement<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_active()?;
        let result = f(self);
        if let Err(err) = &result
            && self.state == TxnState::Active
        {
            tracing::debug!("[TXN] abort txn={} cause={}", self.id(), err);
            self.state = TxnState::Aborted;
        }
        result
    }

    fn lock(&self, table: &str, row_id: RowId, mode: LockMode) -> Result<()> {
        let inner = self.engine.inner();
        inner
            .locks
            .acquire(self.id(), table, row_id, mode, inner.config.lock_timeout)
    }

    fn table_def(&self, table: &str) -> Result<TableDef> {
        self.engine.inner().store.table_def(table)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Rows of `table` matching `filter`, without locking.
    pub fn select(&mut self, table: &str, filter: &Expr<String>) -> Result<Vec<RowSnapshot>> {
        Ok(self
            .select_with_ids(table, filter)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    pub fn select_with_ids(
        &mut self,
        table: &str,
        filter: &Expr<String>,
    ) -> Result<Vec<(RowId, RowSnapshot)>> {
        self.statement(|txn| txn.engine.inner().store.scan(table, txn.id(), filter))
    }

    /// Rows of `table` matching `filter`, each locked in `mode`.
    ///
    /// Rows are re-read after the lock is granted; rows deleted or changed so
    /// they no longer match while this transaction waited are left out.
    pub fn select_for(
        &mut self,
        table: &str,
        filter: &Expr<String>,
        mode: LockMode,
    ) -> Result<Vec<(RowId, RowSnapshot)>> {
        self.statement(|txn| txn.locked_rows(table, filter, mode))
    }

    fn locked_rows(
        &self,
        table: &str,
        filter: &Expr<String>,
        mode: LockMode,
    ) -> Result<Vec<(RowId, RowSnapshot)>> {
        let store = &self.engine.inner().store;
        let candidates = store.scan(table, self.id(), filter)?;
        let mut out = Vec::with_capacity(candidates.len());
        for (row_id, _) in candidates {
            self.lock(table, row_id, mode)?;
            match store.get(table, row_id, self.id())? {
                Some(current) if filter.matches(&current) => out.push((row_id, current)),
                _ => tracing::trace!(
                    "[SELECT] row no longer qualifies after lock table={} row={}",
                    table,
                    row_id
                ),
            }
        }
        tracing::trace!(
            "[SELECT] locked txn={} table={} mode={:?} rows={}",
            self.id(),
            table,
            mode,
            out.len()
        );
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    pub fn insert(&mut self, table: &str, row: RowSnapshot) -> Result<RowId> {
        let ids = self.insert_many(table, vec![row])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::Internal("insert produced no row id".into()))
    }

    /// Insert several rows as one statement. AFTER triggers see every row
    /// already written.
    pub fn insert_many(&mut self, table: &str, rows: Vec<RowSnapshot>) -> Result<Vec<RowId>> {
        self.statement(|txn| {
            txn.table_def(table)?;
            let mut ids = Vec::with_capacity(rows.len());
            let mut after = Vec::with_capacity(rows.len());
            for row in rows {
                let event = txn.fire_before(RowChangeEvent::insert(table, row))?;
                let new_row = event.new_row().cloned().unwrap_or_default();
                let row_id = txn
                    .engine
                    .inner()
                    .store
                    .insert(table, txn.id(), new_row)?;
                txn.lock(table, row_id, LockMode::Exclusive)?;
                tracing::trace!("[INSERT] txn={} table={} row={}", txn.id(), table, row_id);
                ids.push(row_id);
                after.push(event);
            }
            txn.fire_after(after)?;
            Ok(ids)
        })
    }

    /// Apply `assignments` to every row matching `filter`. Returns the number
    /// of rows written.
    pub fn update(
        &mut self,
        table: &str,
        filter: &Expr<String>,
        assignments: &[Assignment],
    ) -> Result<usize> {
        self.statement(|txn| txn.update_rows(table, filter, assignments))
    }

    fn update_rows(
        &mut self,
        table: &str,
        filter: &Expr<String>,
        assignments: &[Assignment],
    ) -> Result<usize> {
        if assignments.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "update of {} assigns no columns",
                table
            )));
        }
        let def = self.table_def(table)?;
        let touches_key = assignments.iter().any(|a| def.is_key_column(a.column()));
        let mode = if touches_key {
            LockMode::Exclusive
        } else {
            LockMode::NoKeyExclusive
        };

        let rows = self.locked_rows(table, filter, mode)?;
        let mut after = Vec::with_capacity(rows.len());
        for (row_id, current) in rows {
            let new_row = apply_assignments(&current, assignments)?;
            let event = self.fire_before(RowChangeEvent::update(table, current, new_row))?;
            let (Some(old), Some(new)) = (event.old_row(), event.new_row()) else {
                return Err(Error::Internal("update event lost a row version".into()));
            };
            if !touches_key
                && def
                    .key_columns
                    .iter()
                    .any(|c| old.get(c).is_distinct_from(new.get(c)))
            {
                // A BEFORE trigger changed a key column.
                self.lock(table, row_id, LockMode::Exclusive)?;
            }
            self.engine
                .inner()
                .store
                .write(table, row_id, self.id(), Some(new.clone()))?;
            tracing::trace!("[UPDATE] txn={} table={} row={}", self.id(), table, row_id);
            after.push(event);
        }
        let count = after.len();
        self.fire_after(after)?;
        Ok(count)
    }

    /// Delete every row matching `filter`. Returns the number of rows deleted.
    pub fn delete(&mut self, table: &str, filter: &Expr<String>) -> Result<usize> {
        self.statement(|txn| {
            txn.table_def(table)?;
            let rows = txn.locked_rows(table, filter, LockMode::Exclusive)?;
            let mut after = Vec::with_capacity(rows.len());
            for (row_id, current) in rows {
                let event = txn.fire_before(RowChangeEvent::delete(table, current))?;
                txn.engine
                    .inner()
                    .store
                    .write(table, row_id, txn.id(), None)?;
                tracing::trace!("[DELETE] txn={} table={} row={}", txn.id(), table, row_id);
                after.push(event);
            }
            let count = after.len();
            txn.fire_after(after)?;
            Ok(count)
        })
    }

    // ---------------------------------------------------------------------
    // Trigger dispatch
    // ---------------------------------------------------------------------

    fn enter_trigger(&mut self, name: &str) -> Result<()> {
        let max = self.engine.config().max_trigger_depth;
        if self.depth >= max {
            tracing::warn!(
                "[TRIGGER] depth limit reached txn={} trigger={} max={}",
                self.id(),
                name,
                max
            );
            return Err(Error::TriggerDepthExceeded(max));
        }
        self.depth += 1;
        Ok(())
    }

    fn fire_before(&mut self, mut event: RowChangeEvent) -> Result<RowChangeEvent> {
        let handlers = self.engine.inner().triggers.matching(
            event.table(),
            TriggerTiming::Before,
            event.operation(),
        )?;
        for trigger in handlers {
            self.enter_trigger(&trigger.spec.name)?;
            tracing::trace!(
                "[TRIGGER] before name={} op={} table={}",
                trigger.spec.name,
                event.operation(),
                event.table()
            );
            let outcome = trigger.handler.fire(self, &event);
            self.depth -= 1;
            match outcome? {
                TriggerOutcome::Continue => {}
                TriggerOutcome::ReplaceRow(row) if event.new_row().is_some() => {
                    event = event.with_new_row(row);
                }
                TriggerOutcome::ReplaceRow(_) => tracing::warn!(
                    "[TRIGGER] ignoring replacement row from {} on delete",
                    trigger.spec.name
                ),
            }
        }
        Ok(event)
    }

    fn fire_after(&mut self, events: Vec<RowChangeEvent>) -> Result<()> {
        for event in events {
            let handlers = self.engine.inner().triggers.matching(
                event.table(),
                TriggerTiming::After,
                event.operation(),
            )?;
            for trigger in handlers {
                self.enter_trigger(&trigger.spec.name)?;
                tracing::trace!(
                    "[TRIGGER] after name={} op={} table={}",
                    trigger.spec.name,
                    event.operation(),
                    event.table()
                );
                let outcome = trigger.handler.fire(self, &event);
                self.depth -= 1;
                outcome?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------------

    /// Make every write of this transaction visible and release its locks.
    ///
    /// Committing an aborted transaction rolls it back and reports
    /// [`Error::TransactionAborted`].
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            TxnState::Active => {}
            TxnState::Aborted => {
                let id = self.id();
                self.finish(false)?;
                return Err(Error::TransactionAborted(id));
            }
            TxnState::Committed | TxnState::RolledBack => {
                return Err(Error::TransactionContextError(format!(
                    "transaction {} is no longer active",
                    self.id()
                )));
            }
        }
        self.finish(true)
    }

    /// Discard every write of this transaction and release its locks.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TxnState::Active | TxnState::Aborted => self.finish(false),
            TxnState::Committed | TxnState::RolledBack => Err(Error::TransactionContextError(
                format!("transaction {} is no longer active", self.id()),
            )),
        }
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        let inner = self.engine.inner();
        let id = self.id();
        let rows = if commit {
            inner.store.commit(id)?
        } else {
            inner.store.rollback(id)?
        };
        self.state = if commit {
            TxnState::Committed
        } else {
            TxnState::RolledBack
        };
        let locks = inner.locks.release_all(id)?;
        tracing::debug!(
            "[TXN] {} txn={} rows={} locks={}",
            if commit { "commit" } else { "rollback" },
            id,
            rows,
            locks
        );
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(self.state, TxnState::Active | TxnState::Aborted)
            && let Err(err) = self.finish(false)
        {
            tracing::warn!("[TXN] rollback on drop failed txn={}: {}", self.id(), err);
        }
    }
}
