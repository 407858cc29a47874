use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use keel_expr::Expr;
use keel_result::{Error, Result};
use keel_runtime::{
    Assignment, Engine, EngineConfig, LockMode, TableDef, Transaction, TriggerOutcome,
    TriggerSpec, TriggerTiming,
};
use keel_test_utils::init_tracing_for_tests;
use keel_types::{Operation, RowChangeEvent, Value, row};

fn engine_with(tables: &[&str]) -> Engine {
    init_tracing_for_tests();
    let engine = Engine::new(EngineConfig::default().with_lock_timeout(Duration::from_millis(200)));
    for t in tables {
        engine
            .create_table(TableDef::new(*t).with_key_columns(["id"]))
            .expect("create table");
    }
    engine
}

fn count_rows(engine: &Engine, table: &str) -> usize {
    engine
        .run(|txn| txn.select(table, &Expr::always()))
        .expect("select")
        .len()
}

#[test]
fn insert_update_delete_round() {
    let engine = engine_with(&["items"]);
    engine
        .run(|txn| {
            txn.insert("items", row! { "id" => 1, "qty" => 2 })?;
            txn.insert("items", row! { "id" => 2, "qty" => 5 })?;
            Ok(())
        })
        .expect("insert");

    let updated = engine
        .run(|txn| {
            txn.update(
                "items",
                &Expr::equals("id", 1),
                &[Assignment::increment("qty", 3)],
            )
        })
        .expect("update");
    assert_eq!(updated, 1);

    let rows = engine
        .run(|txn| txn.select("items", &Expr::equals("id", 1)))
        .expect("select");
    assert_eq!(rows[0].get("qty"), &Value::Integer(5));

    let deleted = engine
        .run(|txn| txn.delete("items", &Expr::equals("qty", 5)))
        .expect("delete");
    assert_eq!(deleted, 2);
    assert_eq!(count_rows(&engine, "items"), 0);
}

#[test]
fn uncommitted_writes_are_invisible_to_others_and_rollback_discards_them() {
    let engine = engine_with(&["items"]);
    let mut writer = engine.begin().expect("begin");
    writer.insert("items", row! { "id" => 1 }).expect("insert");
    assert_eq!(writer.select("items", &Expr::always()).expect("own read").len(), 1);
    assert_eq!(count_rows(&engine, "items"), 0);
    writer.rollback().expect("rollback");
    assert_eq!(count_rows(&engine, "items"), 0);
}

#[test]
fn dropping_an_open_transaction_rolls_back_and_releases_locks() {
    let engine = engine_with(&["items"]);
    engine
        .run(|txn| txn.insert("items", row! { "id" => 1, "v" => 0 }))
        .expect("seed");
    {
        let mut txn = engine.begin().expect("begin");
        txn.update("items", &Expr::always(), &[Assignment::set("v", 9)])
            .expect("update");
    }
    // The lock is gone, so this update does not time out.
    engine
        .run(|txn| txn.update("items", &Expr::always(), &[Assignment::increment("v", 1)]))
        .expect("update after drop");
    let rows = engine
        .run(|txn| txn.select("items", &Expr::always()))
        .expect("select");
    assert_eq!(rows[0].get("v"), &Value::Integer(1));
}

#[test]
fn failed_statement_aborts_transaction() {
    let engine = engine_with(&["items"]);
    let mut txn = engine.begin().expect("begin");
    txn.insert("items", row! { "id" => 1 }).expect("insert");
    assert!(matches!(
        txn.insert("missing", row! { "id" => 1 }),
        Err(Error::TableNotFound(_))
    ));
    assert!(txn.is_aborted());
    assert!(matches!(
        txn.select("items", &Expr::always()),
        Err(Error::TransactionAborted(_))
    ));
    assert!(matches!(txn.commit(), Err(Error::TransactionAborted(_))));
    assert_eq!(count_rows(&engine, "items"), 0);
}

#[test]
fn before_trigger_can_replace_the_new_row() {
    let engine = engine_with(&["items"]);
    engine
        .subscribe(
            TriggerSpec::new(
                "normalize",
                "items",
                TriggerTiming::Before,
                [Operation::Insert, Operation::Update],
            ),
            Arc::new(|_: &mut Transaction, event: &RowChangeEvent| -> Result<TriggerOutcome> {
                let new = event.new_row().cloned().unwrap_or_default();
                Ok(TriggerOutcome::ReplaceRow(new.with("seen", true)))
            }),
        )
        .expect("subscribe");
    engine
        .run(|txn| txn.insert("items", row! { "id" => 1 }))
        .expect("insert");
    let rows = engine
        .run(|txn| txn.select("items", &Expr::is_true("seen")))
        .expect("select");
    assert_eq!(rows.len(), 1);
}

#[test]
fn after_triggers_run_once_all_rows_are_written() {
    let engine = engine_with(&["items"]);
    engine
        .run(|txn| {
            txn.insert_many(
                "items",
                vec![row! { "id" => 1 }, row! { "id" => 2 }, row! { "id" => 3 }],
            )
        })
        .expect("seed");

    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);
    engine
        .subscribe(
            TriggerSpec::new("observe", "items", TriggerTiming::After, [Operation::Delete]),
            Arc::new(move |txn: &mut Transaction, _: &RowChangeEvent| -> Result<TriggerOutcome> {
                // Every row of the statement is already gone.
                let left = txn.select("items", &Expr::always())?.len();
                assert_eq!(left, 0);
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(TriggerOutcome::Continue)
            }),
        )
        .expect("subscribe");
    engine
        .run(|txn| txn.delete("items", &Expr::always()))
        .expect("delete");
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn resubscribing_by_name_replaces_the_handler() {
    let engine = engine_with(&["items"]);
    let hits = Arc::new(AtomicUsize::new(0));
    for step in [1usize, 10] {
        let hits = Arc::clone(&hits);
        engine
            .subscribe(
                TriggerSpec::new("counting", "items", TriggerTiming::After, [Operation::Insert]),
                Arc::new(move |_: &mut Transaction, _: &RowChangeEvent| -> Result<TriggerOutcome> {
                    hits.fetch_add(step, Ordering::SeqCst);
                    Ok(TriggerOutcome::Continue)
                }),
            )
            .expect("subscribe");
    }
    assert_eq!(engine.triggers_on("items").expect("list").len(), 1);
    engine
        .run(|txn| txn.insert("items", row! { "id" => 1 }))
        .expect("insert");
    assert_eq!(hits.load(Ordering::SeqCst), 10);

    assert!(engine.drop_trigger("counting").expect("drop"));
    assert!(!engine.drop_trigger("counting").expect("drop again"));
}

#[test]
fn subscribing_to_unknown_table_is_a_configuration_error() {
    let engine = engine_with(&[]);
    let err = engine
        .subscribe(
            TriggerSpec::new("t", "missing", TriggerTiming::After, [Operation::Insert]),
            Arc::new(|_: &mut Transaction, _: &RowChangeEvent| -> Result<TriggerOutcome> {
                Ok(TriggerOutcome::Continue)
            }),
        )
        .expect_err("unknown table");
    assert!(matches!(err, Error::ConfigurationError(_)));
}

#[test]
fn runaway_cascade_hits_depth_limit() {
    let engine = engine_with(&["items"]);
    engine
        .subscribe(
            TriggerSpec::new("recurse", "items", TriggerTiming::After, [Operation::Insert]),
            Arc::new(|txn: &mut Transaction, _: &RowChangeEvent| -> Result<TriggerOutcome> {
                txn.insert("items", row! { "id" => 0 })?;
                Ok(TriggerOutcome::Continue)
            }),
        )
        .expect("subscribe");
    let err = engine
        .run(|txn| txn.insert("items", row! { "id" => 1 }))
        .expect_err("depth");
    assert!(matches!(err, Error::TriggerDepthExceeded(_)));
    assert_eq!(count_rows(&engine, "items"), 0);
}

#[test]
fn blocked_update_times_out() {
    let engine = engine_with(&["items"]);
    engine
        .run(|txn| txn.insert("items", row! { "id" => 1, "v" => 0 }))
        .expect("seed");
    let mut holder = engine.begin().expect("begin");
    holder
        .select_for("items", &Expr::equals("id", 1), LockMode::Share)
        .expect("share lock");
    let err = engine
        .run(|txn| txn.update("items", &Expr::always(), &[Assignment::set("v", 1)]))
        .expect_err("timeout");
    assert!(matches!(err, Error::LockTimeout { .. }));
    holder.commit().expect("commit");
}

#[test]
fn concurrent_increments_are_not_lost() {
    let engine = engine_with(&["counters"]);
    engine
        .run(|txn| txn.insert("counters", row! { "id" => 1, "n" => 0 }))
        .expect("seed");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    engine
                        .run(|txn| {
                            txn.update(
                                "counters",
                                &Expr::equals("id", 1),
                                &[Assignment::increment("n", 1)],
                            )
                        })
                        .expect("increment");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }
    let rows = engine
        .run(|txn| txn.select("counters", &Expr::always()))
        .expect("select");
    assert_eq!(rows[0].get("n"), &Value::Integer(100));
}
