//! keel: reactive consistency rules over a transactional row store
//!
//! This crate is the entrypoint for the keel toolkit. It re-exports the
//! engine and the rule definitions from the underlying `keel-*` crates.
//!
//! # Quick Start
//!
//! Keep a denormalized child count on a parent table:
//!
//! ```rust
//! use keel::{CounterCache, Engine, Expr, Relationship, TableDef, define_counter_cache, row};
//!
//! let engine = Engine::default();
//! engine.create_table(TableDef::new("posts").with_key_columns(["id"])).unwrap();
//! engine.create_table(TableDef::new("comments")).unwrap();
//! define_counter_cache(
//!     &engine,
//!     CounterCache::new(
//!         "posts",
//!         "comment_count",
//!         "comments",
//!         Relationship::new([("id", "post_id")]).unwrap(),
//!     ),
//! )
//! .unwrap();
//!
//! engine
//!     .run(|txn| {
//!         txn.insert("posts", row! { "id" => 1, "comment_count" => 0 })?;
//!         txn.insert("comments", row! { "post_id" => 1 })
//!     })
//!     .unwrap();
//! let posts = engine.run(|txn| txn.select("posts", &Expr::always())).unwrap();
//! assert_eq!(posts[0].get("comment_count").as_i64(), Some(1));
//! ```
//!
//! # Architecture
//!
//! - **Rules** (`keel-rules`): counter and sum caches, conditional and array
//!   foreign keys, audit trail, `updated_at` stamping.
//! - **Runtime** (`keel-runtime`, `keel-transaction`): transactions, row
//!   locks and trigger dispatch.
//! - **Storage** (`keel-storage`): in-memory versioned tables.
//! - **Shared types** (`keel-types`, `keel-expr`, `keel-result`): values, rows,
//!   filters, relationships and errors.

pub use keel_rules::{
    ArrayForeignKey, AuditEntry, AuditRule, ConditionalForeignKey, CounterCache,
    DEFAULT_AUDIT_TABLE, Qualifier, SumCache, TimestampRule, audit_entries, create_audit_table,
    define_array_foreign_key, define_audit_rule, define_conditional_foreign_key,
    define_counter_cache, define_sum_cache, define_timestamp_rule, drop_rule,
};

pub use keel_runtime::{
    Assignment, Engine, EngineConfig, LockMode, TableDef, Transaction, TriggerHandler,
    TriggerOutcome, TriggerSpec, TriggerTiming,
};

pub use keel_expr::{Expr, Relationship};
pub use keel_result::{ArrayShapeKind, Error, Result};
pub use keel_types::{Operation, RowChangeEvent, RowId, RowSnapshot, Value, row};
