//! Append-only audit trail of row updates and deletes.
//!
//! Each audited update or delete appends one row to the audit table:
//!
//! | column       | value                                              |
//! |--------------|----------------------------------------------------|
//! | `table_name` | table the change happened on                       |
//! | `changed_at` | logical "now" of the writing transaction           |
//! | `deleted`    | `true` for deletes                                 |
//! | `changes`    | JSON object of column name to prior value          |
//!
//! Inserts are not recorded.

use std::sync::Arc;

use keel_expr::Expr;
use keel_result::{Error, Result};
use keel_runtime::{
    Engine, TableDef, Transaction, TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming,
};
use keel_types::{Operation, RowChangeEvent, RowId, RowSnapshot, Value};
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::ensure_tables;

pub const DEFAULT_AUDIT_TABLE: &str = "audit_table";

/// Audit rule definition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditRule {
    pub table: String,
    /// Columns recorded on every update, changed or not.
    pub include: Vec<String>,
    /// Columns whose changes alone do not produce an entry.
    pub ignore: Vec<String>,
    /// Destination table; defaults to [`DEFAULT_AUDIT_TABLE`].
    pub audit_table: Option<String>,
}

impl AuditRule {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_include<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignore<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audit_table(mut self, audit_table: impl Into<String>) -> Self {
        self.audit_table = Some(audit_table.into());
        self
    }

    pub fn trigger_name(&self) -> String {
        format!("pt_audit_{}", self.table)
    }
}

/// One recorded change, read back from the audit table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Position in the audit table; increases with every entry.
    pub id: RowId,
    pub table_name: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub changed_at: OffsetDateTime,
    pub deleted: bool,
    pub changes: Map<String, JsonValue>,
}

fn serialize_rfc3339<S>(ts: &OffsetDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

impl AuditEntry {
    fn to_row(&self) -> RowSnapshot {
        RowSnapshot::from_pairs(vec![
            ("table_name".to_string(), Value::from(self.table_name.as_str())),
            ("changed_at".to_string(), Value::Timestamp(self.changed_at)),
            ("deleted".to_string(), Value::Boolean(self.deleted)),
            (
                "changes".to_string(),
                Value::Json(JsonValue::Object(self.changes.clone())),
            ),
        ])
    }

    /// Decode a stored audit row.
    pub fn from_row(id: RowId, row: &RowSnapshot) -> Result<Self> {
        let malformed = |column: &str| {
            Error::InvalidArgumentError(format!("audit row {} has no valid {}", id, column))
        };
        let table_name = row
            .get("table_name")
            .as_text()
            .ok_or_else(|| malformed("table_name"))?
            .to_string();
        let changed_at = row
            .get("changed_at")
            .as_timestamp()
            .ok_or_else(|| malformed("changed_at"))?;
        let deleted = row.get("deleted").as_bool().unwrap_or(false);
        let changes = match row.get("changes").as_json() {
            Some(JsonValue::Object(map)) => map.clone(),
            _ => return Err(malformed("changes")),
        };
        Ok(Self {
            id,
            table_name,
            changed_at,
            deleted,
            changes,
        })
    }
}

/// Create the audit table. Fails if it already exists.
pub fn create_audit_table(engine: &Engine, name: Option<&str>) -> Result<String> {
    let name = name.unwrap_or(DEFAULT_AUDIT_TABLE);
    engine.create_table(TableDef::new(name))?;
    tracing::debug!("[TRIGGER] created audit table {}", name);
    Ok(name.to_string())
}

/// Every entry of `audit_table`, oldest first.
pub fn audit_entries(txn: &mut Transaction, audit_table: &str) -> Result<Vec<AuditEntry>> {
    txn.select_with_ids(audit_table, &Expr::always())?
        .into_iter()
        .map(|(id, row)| AuditEntry::from_row(id, &row))
        .collect()
}

#[derive(Debug)]
struct AuditRecorder {
    name: String,
    table: String,
    audit_table: String,
    include: Vec<String>,
    ignore: FxHashSet<String>,
}

impl AuditRecorder {
    /// Change set for an update, or `None` when only ignored columns changed.
    fn update_changes(
        &self,
        old: &RowSnapshot,
        new: &RowSnapshot,
    ) -> Option<Map<String, JsonValue>> {
        let changed: FxHashSet<&str> = old
            .columns()
            .chain(new.columns())
            .filter(|c| old.get(c).is_distinct_from(new.get(c)))
            .collect();
        if changed.iter().all(|c| self.ignore.contains(*c)) {
            return None;
        }
        let mut changes = Map::new();
        for column in changed.iter().filter(|c| !self.ignore.contains(**c)) {
            changes.insert(column.to_string(), old.get(column).to_json());
        }
        for column in &self.include {
            let value = if self.ignore.contains(column) && changed.contains(column.as_str()) {
                new.get(column)
            } else {
                old.get(column)
            };
            changes.insert(column.clone(), value.to_json());
        }
        Some(changes)
    }

    fn record(
        &self,
        txn: &mut Transaction,
        deleted: bool,
        changes: Map<String, JsonValue>,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: 0,
            table_name: self.table.clone(),
            changed_at: txn.now(),
            deleted,
            changes,
        };
        let id = txn.insert(&self.audit_table, entry.to_row())?;
        tracing::trace!(
            "[TRIGGER] {} recorded entry {} deleted={}",
            self.name,
            id,
            deleted
        );
        Ok(())
    }
}

impl TriggerHandler for AuditRecorder {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        match (event.operation(), event.old_row(), event.new_row()) {
            (Operation::Delete, Some(old), _) => {
                let changes = match old.to_json() {
                    JsonValue::Object(map) => map,
                    _ => Map::new(),
                };
                self.record(txn, true, changes)?;
            }
            (Operation::Update, Some(old), Some(new)) => {
                if let Some(changes) = self.update_changes(old, new) {
                    self.record(txn, false, changes)?;
                }
            }
            _ => {}
        }
        Ok(TriggerOutcome::Continue)
    }
}

/// Install (or replace) the audit trigger of `rule.table`. Returns the trigger
/// name.
pub fn define_audit_rule(engine: &Engine, rule: AuditRule) -> Result<String> {
    let audit_table = rule
        .audit_table
        .clone()
        .unwrap_or_else(|| DEFAULT_AUDIT_TABLE.to_string());
    ensure_tables(engine, &[rule.table.as_str(), audit_table.as_str()])?;
    if rule.table == audit_table {
        return Err(Error::ConfigurationError(format!(
            "table {} cannot audit into itself",
            rule.table
        )));
    }
    let name = rule.trigger_name();
    let recorder = AuditRecorder {
        name: name.clone(),
        table: rule.table.clone(),
        audit_table,
        include: rule.include,
        ignore: rule.ignore.into_iter().collect(),
    };
    tracing::debug!(
        "[TRIGGER] define audit name={} table={} into={}",
        name,
        recorder.table,
        recorder.audit_table
    );
    engine.subscribe(
        TriggerSpec::new(
            name.clone(),
            rule.table,
            TriggerTiming::After,
            [Operation::Update, Operation::Delete],
        ),
        Arc::new(recorder),
    )?;
    Ok(name)
}
