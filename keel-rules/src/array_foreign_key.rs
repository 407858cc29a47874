//! Foreign keys whose referencing side is an array column.
//!
//! The last referencing key column holds a one-dimensional array; every
//! element, paired with the scalar prefix columns before it, must match a row
//! of the referenced table. The last referenced key column is the scalar the
//! elements are compared against.

use std::sync::Arc;

use keel_expr::{Expr, Filter, Operator};
use keel_result::{ArrayShapeKind, Error, Result};
use keel_runtime::{
    Engine, LockMode, Transaction, TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming,
};
use keel_types::{Operation, RowChangeEvent, RowSnapshot, Value};
use rustc_hash::FxHashSet;

use crate::{ensure_key_columns, ensure_tables};

/// Array foreign key definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayForeignKey {
    pub referencing_table: String,
    /// Prefix columns followed by the array column.
    pub referencing_key: Vec<String>,
    pub referenced_table: String,
    /// Prefix columns followed by the referenced scalar column.
    pub referenced_key: Vec<String>,
    pub referencing_trigger_name: Option<String>,
    pub referenced_trigger_name: Option<String>,
}

impl ArrayForeignKey {
    pub fn new<I, J, S, T>(
        referencing_table: impl Into<String>,
        referencing_key: I,
        referenced_table: impl Into<String>,
        referenced_key: J,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            referencing_table: referencing_table.into(),
            referencing_key: referencing_key.into_iter().map(Into::into).collect(),
            referenced_table: referenced_table.into(),
            referenced_key: referenced_key.into_iter().map(Into::into).collect(),
            referencing_trigger_name: None,
            referenced_trigger_name: None,
        }
    }

    pub fn with_referencing_trigger_name(mut self, name: impl Into<String>) -> Self {
        self.referencing_trigger_name = Some(name.into());
        self
    }

    pub fn with_referenced_trigger_name(mut self, name: impl Into<String>) -> Self {
        self.referenced_trigger_name = Some(name.into());
        self
    }

    pub fn referencing_name(&self) -> String {
        self.referencing_trigger_name.clone().unwrap_or_else(|| {
            format!(
                "pt_afk_{}_{}",
                self.referencing_table,
                self.referencing_key.join("_")
            )
        })
    }

    pub fn referenced_name(&self) -> String {
        self.referenced_trigger_name.clone().unwrap_or_else(|| {
            format!(
                "pt_afk_{}_{}",
                self.referenced_table,
                self.referenced_key.join("_")
            )
        })
    }

    fn validate(&self) -> Result<()> {
        if self.referencing_key.is_empty() || self.referenced_key.is_empty() {
            return Err(Error::configuration(
                "array foreign key requires at least one key column on each side",
            ));
        }
        if self.referencing_key.len() != self.referenced_key.len() {
            return Err(Error::ConfigurationError(format!(
                "array foreign key column count mismatch: ({}) vs ({})",
                self.referencing_key.join(", "),
                self.referenced_key.join(", ")
            )));
        }
        for key in [&self.referencing_key, &self.referenced_key] {
            if key.iter().any(String::is_empty) {
                return Err(Error::configuration("array foreign key column must not be empty"));
            }
            let mut seen = FxHashSet::default();
            if let Some(dup) = key.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(Error::ConfigurationError(format!(
                    "array foreign key lists column '{}' more than once",
                    dup
                )));
            }
        }
        Ok(())
    }
}

/// Column lists shared by both handlers of one array foreign key.
#[derive(Debug)]
struct KeyColumns {
    referencing_table: String,
    referenced_table: String,
    referencing: Vec<String>,
    referenced: Vec<String>,
}

impl KeyColumns {
    fn prefix_len(&self) -> usize {
        self.referencing.len() - 1
    }

    fn array_column(&self) -> &str {
        &self.referencing[self.prefix_len()]
    }

    fn referenced_column(&self) -> &str {
        &self.referenced[self.prefix_len()]
    }

    fn changed(columns: &[String], old: &RowSnapshot, new: &RowSnapshot) -> bool {
        columns
            .iter()
            .any(|c| old.get(c).is_distinct_from(new.get(c)))
    }

    /// Equality on the prefix columns: `to[i] = row[from[i]]`.
    fn prefix_filter(&self, row: &RowSnapshot, from: &[String], to: &[String]) -> Expr<String> {
        Expr::all_of(
            from.iter()
                .zip(to)
                .take(self.prefix_len())
                .map(|(f, t)| Filter::new(t.as_str(), Operator::Equals(row.get(f).clone())))
                .collect(),
        )
    }

    fn missing_message(&self) -> String {
        format!(
            "Entry in foreign key array ({}) not in referenced column ({})",
            self.referencing.join(", "),
            self.referenced.join(", ")
        )
    }

    fn still_referenced_message(&self) -> String {
        format!(
            "Entry in referenced column ({}) still in foreign key array ({})",
            self.referenced.join(", "),
            self.referencing.join(", ")
        )
    }
}

/// Validates the array of a written referencing row.
#[derive(Debug)]
struct ReferencingCheck {
    name: String,
    keys: Arc<KeyColumns>,
}

impl ReferencingCheck {
    /// Elements of `value` as a set, or the shape error that prevents it.
    fn elements<'a>(&self, op: Operation, value: &'a Value) -> Result<&'a [Value]> {
        let keys = &self.keys;
        let Some(items) = value.as_array() else {
            return Err(Error::InvalidArgumentError(format!(
                "foreign key array {} holds a {} value",
                keys.array_column(),
                value.type_name()
            )));
        };
        if value.array_ndims().unwrap_or(0) > 1 {
            return Err(Error::array_shape_violation(
                op.as_str(),
                &keys.referencing_table,
                &self.name,
                ArrayShapeKind::MultiDimensional,
                format!(
                    "Foreign key array {} has more than 1 dimension",
                    keys.array_column()
                ),
            ));
        }
        let mut seen = FxHashSet::default();
        for key in items.iter().filter_map(Value::key) {
            if !seen.insert(key) {
                return Err(Error::array_shape_violation(
                    op.as_str(),
                    &keys.referencing_table,
                    &self.name,
                    ArrayShapeKind::DuplicateEntry,
                    format!("Duplicate entry in foreign key array {}", keys.array_column()),
                ));
            }
        }
        Ok(items)
    }
}

impl TriggerHandler for ReferencingCheck {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        let keys = &self.keys;
        let Some(new) = event.new_row() else {
            return Ok(TriggerOutcome::Continue);
        };
        if let Some(old) = event.old_row()
            && !KeyColumns::changed(&keys.referencing, old, new)
        {
            return Ok(TriggerOutcome::Continue);
        }
        if !new.all_present(&keys.referencing) {
            return Ok(TriggerOutcome::Continue);
        }
        let op = event.operation();
        let items = self.elements(op, new.get(keys.array_column()))?;
        if items.is_empty() {
            return Ok(TriggerOutcome::Continue);
        }

        let filter = keys
            .prefix_filter(new, &keys.referencing, &keys.referenced)
            .and(Expr::Pred(Filter::new(
                keys.referenced_column(),
                Operator::In(items.to_vec()),
            )));
        let found: FxHashSet<_> = txn
            .select_for(&keys.referenced_table, &filter, LockMode::KeyShare)?
            .iter()
            .filter_map(|(_, row)| row.get(keys.referenced_column()).key())
            .collect();
        let missing: Vec<String> = items
            .iter()
            .filter(|item| item.key().is_none_or(|k| !found.contains(&k)))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(TriggerOutcome::Continue);
        }
        tracing::debug!(
            "[TRIGGER] {} rejects {} on {}: missing {}",
            self.name,
            op,
            keys.referencing_table,
            missing.join(",")
        );
        Err(Error::reference_violation(
            op.as_str(),
            &keys.referencing_table,
            &self.name,
            format!("{}: {{{}}}", keys.missing_message(), missing.join(",")),
        ))
    }
}

/// Rejects changes to referenced rows whose old key is still in some array.
#[derive(Debug)]
struct ReferencedCheck {
    name: String,
    keys: Arc<KeyColumns>,
}

impl TriggerHandler for ReferencedCheck {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        let keys = &self.keys;
        let Some(old) = event.old_row() else {
            return Ok(TriggerOutcome::Continue);
        };
        if let Some(new) = event.new_row()
            && !KeyColumns::changed(&keys.referenced, old, new)
        {
            return Ok(TriggerOutcome::Continue);
        }
        if !old.all_present(&keys.referenced) {
            return Ok(TriggerOutcome::Continue);
        }
        let filter = keys
            .prefix_filter(old, &keys.referenced, &keys.referencing)
            .and(Expr::contains(
                keys.array_column(),
                old.get(keys.referenced_column()).clone(),
            ));
        let holders = txn.select_for(&keys.referencing_table, &filter, LockMode::Share)?;
        if holders.is_empty() {
            return Ok(TriggerOutcome::Continue);
        }
        tracing::debug!(
            "[TRIGGER] {} rejects {} on {}: {} referencing rows",
            self.name,
            event.operation(),
            keys.referenced_table,
            holders.len()
        );
        Err(Error::reference_violation(
            event.operation().as_str(),
            &keys.referenced_table,
            &self.name,
            keys.still_referenced_message(),
        ))
    }
}

/// Install (or replace) both halves of an array foreign key as one step.
///
/// Returns `(referencing_trigger_name, referenced_trigger_name)`.
pub fn define_array_foreign_key(engine: &Engine, def: ArrayForeignKey) -> Result<(String, String)> {
    def.validate()?;
    ensure_tables(
        engine,
        &[def.referencing_table.as_str(), def.referenced_table.as_str()],
    )?;
    ensure_key_columns(engine, &def.referenced_table, &def.referenced_key)?;
    let referencing_name = def.referencing_name();
    let referenced_name = def.referenced_name();
    if referencing_name == referenced_name {
        return Err(Error::ConfigurationError(format!(
            "array foreign key trigger names collide: {}",
            referencing_name
        )));
    }
    let keys = Arc::new(KeyColumns {
        referencing_table: def.referencing_table.clone(),
        referenced_table: def.referenced_table.clone(),
        referencing: def.referencing_key,
        referenced: def.referenced_key,
    });
    tracing::debug!(
        "[TRIGGER] define array foreign key {}({}) -> {}({})",
        keys.referencing_table,
        keys.referencing.join(", "),
        keys.referenced_table,
        keys.referenced.join(", ")
    );
    let referencing = ReferencingCheck {
        name: referencing_name.clone(),
        keys: Arc::clone(&keys),
    };
    let referenced = ReferencedCheck {
        name: referenced_name.clone(),
        keys,
    };
    engine.subscribe_all(vec![
        (
            TriggerSpec::new(
                referencing_name.clone(),
                def.referencing_table,
                TriggerTiming::After,
                [Operation::Insert, Operation::Update],
            ),
            Arc::new(referencing) as Arc<dyn TriggerHandler>,
        ),
        (
            TriggerSpec::new(
                referenced_name.clone(),
                def.referenced_table,
                TriggerTiming::After,
                [Operation::Update, Operation::Delete],
            ),
            Arc::new(referenced) as Arc<dyn TriggerHandler>,
        ),
    ])?;
    Ok((referencing_name, referenced_name))
}
