use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_expr::Expr;
use keel_result::{Error, Result};
use keel_types::{RowId, RowSnapshot, TxnId};
use rustc_hash::FxHashMap;

use crate::table::TableDef;

/// Uncommitted version of a row. `row == None` marks a pending delete.
#[derive(Clone, Debug)]
struct Pending {
    txn: TxnId,
    row: Option<RowSnapshot>,
}

#[derive(Clone, Debug, Default)]
struct StoredRow {
    committed: Option<RowSnapshot>,
    pending: Option<Pending>,
}

impl StoredRow {
    fn visible_to(&self, txn: TxnId) -> Option<&RowSnapshot> {
        match &self.pending {
            Some(p) if p.txn == txn => p.row.as_ref(),
            _ => self.committed.as_ref(),
        }
    }
}

#[derive(Debug)]
struct TableData {
    def: TableDef,
    next_row_id: RowId,
    rows: BTreeMap<RowId, StoredRow>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: FxHashMap<String, TableData>,
    /// Rows with a pending version, per owning transaction.
    write_sets: FxHashMap<TxnId, Vec<(String, RowId)>>,
}

impl StoreState {
    fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
}

/// In-memory, versioned row store.
pub struct MemStore {
    state: RwLock<StoreState>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    fn state_read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("MemStore state read lock poisoned".into()))
    }

    fn state_write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("MemStore state write lock poisoned".into()))
    }

    pub fn create_table(&self, def: TableDef) -> Result<()> {
        let mut state = self.state_write()?;
        if state.tables.contains_key(&def.name) {
            return Err(Error::TableAlreadyExists(def.name));
        }
        tracing::debug!("[STORE] create table={} key_columns={:?}", def.name, def.key_columns);
        state.tables.insert(
            def.name.clone(),
            TableData {
                def,
                next_row_id: 0,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state_read()
            .map(|state| state.tables.contains_key(name))
            .unwrap_or(false)
    }

    pub fn table_def(&self, name: &str) -> Result<TableDef> {
        Ok(self.state_read()?.table(name)?.def.clone())
    }

    /// Rows of `table` visible to `txn` that match `filter`, in row id order.
    pub fn scan(
        &self,
        table: &str,
        txn: TxnId,
        filter: &Expr<String>,
    ) -> Result<Vec<(RowId, RowSnapshot)>> {
        let state = self.state_read()?;
        let data = state.table(table)?;
        let out: Vec<(RowId, RowSnapshot)> = data
            .rows
            .iter()
            .filter_map(|(id, stored)| stored.visible_to(txn).map(|row| (*id, row)))
            .filter(|(_, row)| filter.matches(row))
            .map(|(id, row)| (id, row.clone()))
            .collect();
        tracing::trace!(
            "[STORE] scan table={} txn={} matched={}",
            table,
            txn,
            out.len()
        );
        Ok(out)
    }

    /// The version of one row visible to `txn`.
    pub fn get(&self, table: &str, row_id: RowId, txn: TxnId) -> Result<Option<RowSnapshot>> {
        let state = self.state_read()?;
        let data = state.table(table)?;
        Ok(data
            .rows
            .get(&row_id)
            .and_then(|stored| stored.visible_to(txn))
            .cloned())
    }

    /// Allocate a row id and store `row` as a pending insert owned by `txn`.
    pub fn insert(&self, table: &str, txn: TxnId, row: RowSnapshot) -> Result<RowId> {
        let mut state = self.state_write()?;
        let data = state.table_mut(table)?;
        let row_id = data.next_row_id;
        data.next_row_id = row_id
            .checked_add(1)
            .ok_or_else(|| Error::Internal(format!("row id space exhausted for {}", table)))?;
        data.rows.insert(
            row_id,
            StoredRow {
                committed: None,
                pending: Some(Pending {
                    txn,
                    row: Some(row),
                }),
            },
        );
        state
            .write_sets
            .entry(txn)
            .or_default()
            .push((table.to_string(), row_id));
        Ok(row_id)
    }

    /// Replace the version of `row_id` seen by `txn`. `None` deletes it.
    ///
    /// The caller must hold the row's write lock; a pending version owned by a
    /// different transaction is reported as an internal error.
    pub fn write(
        &self,
        table: &str,
        row_id: RowId,
        txn: TxnId,
        row: Option<RowSnapshot>,
    ) -> Result<()> {
        let mut state = self.state_write()?;
        let data = state.table_mut(table)?;
        let stored = data.rows.get_mut(&row_id).ok_or_else(|| {
            Error::Internal(format!("row {} missing from table {}", row_id, table))
        })?;
        let first_write = match &stored.pending {
            Some(p) if p.txn != txn => {
                return Err(Error::Internal(format!(
                    "row {} of {} has a pending version owned by txn {}",
                    row_id, table, p.txn
                )));
            }
            Some(_) => false,
            None => true,
        };
        stored.pending = Some(Pending { txn, row });
        if first_write {
            state
                .write_sets
                .entry(txn)
                .or_default()
                .push((table.to_string(), row_id));
        }
        Ok(())
    }

    /// Promote every pending version owned by `txn`.
    pub fn commit(&self, txn: TxnId) -> Result<usize> {
        self.finish(txn, true)
    }

    /// Discard every pending version owned by `txn`.
    pub fn rollback(&self, txn: TxnId) -> Result<usize> {
        self.finish(txn, false)
    }

    fn finish(&self, txn: TxnId, commit: bool) -> Result<usize> {
        let mut state = self.state_write()?;
        let touched = state.write_sets.remove(&txn).unwrap_or_default();
        let count = touched.len();
        for (table, row_id) in touched {
            let Some(data) = state.tables.get_mut(&table) else {
                continue;
            };
            let Some(stored) = data.rows.get_mut(&row_id) else {
                continue;
            };
            match stored.pending.take() {
                Some(p) if p.txn == txn => {
                    if commit {
                        stored.committed = p.row;
                    }
                }
                other => stored.pending = other,
            }
            if stored.committed.is_none() && stored.pending.is_none() {
                data.rows.remove(&row_id);
            }
        }
        tracing::debug!(
            "[STORE] {} txn={} rows={}",
            if commit { "commit" } else { "rollback" },
            txn,
            count
        );
        Ok(count)
    }
}
