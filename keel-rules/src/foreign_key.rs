//! Conditional (NULL-tolerant) scalar foreign keys.
//!
//! A child row whose key columns are all non-NULL must point at an existing
//! parent; a child with any NULL key column is exempt. Two handlers enforce
//! this:
//!
//! - child side, AFTER insert/update on the child: the referenced parent must
//!   exist, and is locked `FOR KEY SHARE` so its key cannot change or vanish
//!   before this transaction ends
//! - parent side, AFTER update/delete on the parent: no child may still refer
//!   to the old key; children are locked `FOR SHARE` while checking

use std::sync::Arc;

use keel_expr::Relationship;
use keel_result::{Error, Result};
use keel_runtime::{
    Engine, LockMode, Transaction, TriggerHandler, TriggerOutcome, TriggerSpec, TriggerTiming,
};
use keel_types::{Operation, RowChangeEvent};

use crate::{ensure_key_columns, ensure_tables};

/// Scalar foreign key definition.
///
/// `relationship` pairs `(parent_column, child_column)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalForeignKey {
    pub parent_table: String,
    pub child_table: String,
    pub relationship: Relationship,
    pub parent_trigger_name: Option<String>,
    pub child_trigger_name: Option<String>,
}

impl ConditionalForeignKey {
    pub fn new(
        parent_table: impl Into<String>,
        child_table: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            parent_table: parent_table.into(),
            child_table: child_table.into(),
            relationship,
            parent_trigger_name: None,
            child_trigger_name: None,
        }
    }

    pub fn with_parent_trigger_name(mut self, name: impl Into<String>) -> Self {
        self.parent_trigger_name = Some(name.into());
        self
    }

    pub fn with_child_trigger_name(mut self, name: impl Into<String>) -> Self {
        self.child_trigger_name = Some(name.into());
        self
    }

    pub fn parent_name(&self) -> String {
        self.parent_trigger_name.clone().unwrap_or_else(|| {
            format!(
                "pt_cfk_{}_{}",
                self.parent_table,
                self.relationship.target_columns().join("_")
            )
        })
    }

    pub fn child_name(&self) -> String {
        self.child_trigger_name.clone().unwrap_or_else(|| {
            format!(
                "pt_cfk_{}_{}",
                self.child_table,
                self.relationship.source_columns().join("_")
            )
        })
    }
}

/// Rejects parent key changes and deletes that would orphan a child.
#[derive(Debug)]
struct ParentCheck {
    name: String,
    parent_table: String,
    child_table: String,
    /// `(child_column, parent_column)`: finds children of a parent row.
    children: Relationship,
}

impl TriggerHandler for ParentCheck {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        let Some(old) = event.old_row() else {
            return Ok(TriggerOutcome::Continue);
        };
        if let Some(new) = event.new_row()
            && !self.children.changed(old, new)
        {
            return Ok(TriggerOutcome::Continue);
        }
        let Some(filter) = self.children.filter_for(old) else {
            // Incomplete key: nothing can refer to it.
            return Ok(TriggerOutcome::Continue);
        };
        let referencing = txn.select_for(&self.child_table, &filter, LockMode::Share)?;
        if !referencing.is_empty() {
            tracing::debug!(
                "[TRIGGER] {} rejects {} on {}: {} child rows",
                self.name,
                event.operation(),
                self.parent_table,
                referencing.len()
            );
            return Err(Error::foreign_key_violation(
                event.operation().as_str(),
                &self.parent_table,
                &self.name,
            ));
        }
        Ok(TriggerOutcome::Continue)
    }
}

/// Rejects complete child keys that point at no parent.
#[derive(Debug)]
struct ChildCheck {
    name: String,
    parent_table: String,
    child_table: String,
    /// `(parent_column, child_column)`: finds the parent of a child row.
    parents: Relationship,
}

impl TriggerHandler for ChildCheck {
    fn fire(&self, txn: &mut Transaction, event: &RowChangeEvent) -> Result<TriggerOutcome> {
        let Some(new) = event.new_row() else {
            return Ok(TriggerOutcome::Continue);
        };
        if let Some(old) = event.old_row()
            && !self.parents.changed(old, new)
        {
            return Ok(TriggerOutcome::Continue);
        }
        let Some(filter) = self.parents.filter_for(new) else {
            return Ok(TriggerOutcome::Continue);
        };
        let parents = txn.select_for(&self.parent_table, &filter, LockMode::KeyShare)?;
        if parents.is_empty() {
            tracing::debug!(
                "[TRIGGER] {} rejects {} on {}: no parent in {}",
                self.name,
                event.operation(),
                self.child_table,
                self.parent_table
            );
            return Err(Error::foreign_key_violation(
                event.operation().as_str(),
                &self.child_table,
                &self.name,
            ));
        }
        Ok(TriggerOutcome::Continue)
    }
}

/// Install (or replace) both halves of a scalar foreign key as one step.
///
/// Returns `(parent_trigger_name, child_trigger_name)`.
pub fn define_conditional_foreign_key(
    engine: &Engine,
    def: ConditionalForeignKey,
) -> Result<(String, String)> {
    ensure_tables(engine, &[def.parent_table.as_str(), def.child_table.as_str()])?;
    ensure_key_columns(engine, &def.parent_table, def.relationship.target_columns())?;
    let parent_name = def.parent_name();
    let child_name = def.child_name();
    if parent_name == child_name {
        return Err(Error::ConfigurationError(format!(
            "foreign key trigger names collide: {}",
            parent_name
        )));
    }
    let parent = ParentCheck {
        name: parent_name.clone(),
        parent_table: def.parent_table.clone(),
        child_table: def.child_table.clone(),
        children: def.relationship.reversed(),
    };
    let child = ChildCheck {
        name: child_name.clone(),
        parent_table: def.parent_table.clone(),
        child_table: def.child_table.clone(),
        parents: def.relationship,
    };
    tracing::debug!(
        "[TRIGGER] define foreign key {} -> {} parent={} child={}",
        def.child_table,
        def.parent_table,
        parent_name,
        child_name
    );
    engine.subscribe_all(vec![
        (
            TriggerSpec::new(
                parent_name.clone(),
                def.parent_table,
                TriggerTiming::After,
                [Operation::Update, Operation::Delete],
            ),
            Arc::new(parent) as Arc<dyn TriggerHandler>,
        ),
        (
            TriggerSpec::new(
                child_name.clone(),
                def.child_table,
                TriggerTiming::After,
                [Operation::Insert, Operation::Update],
            ),
            Arc::new(child) as Arc<dyn TriggerHandler>,
        ),
    ])?;
    Ok((parent_name, child_name))
}
