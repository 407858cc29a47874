//! End-to-end checks of several rules sharing one engine.

use keel::{
    ArrayForeignKey, Assignment, AuditRule, ConditionalForeignKey, CounterCache, Engine, Error, Expr,
    Relationship, SumCache, TableDef, TimestampRule, Value, audit_entries, create_audit_table,
    define_array_foreign_key, define_audit_rule, define_conditional_foreign_key,
    define_counter_cache, define_sum_cache, define_timestamp_rule, row,
};
use keel_test_utils::init_tracing_for_tests;
use serde_json::json;

fn count(engine: &Engine, id: i64) -> Value {
    let rows = engine
        .run(|txn| txn.select("counter_table", &Expr::equals("id", id)))
        .expect("select");
    rows[0].get("count").clone()
}

#[test]
fn counter_follows_a_row_between_targets() {
    init_tracing_for_tests();
    let engine = Engine::default();
    engine
        .create_table(TableDef::new("counter_table").with_key_columns(["id"]))
        .expect("counter_table");
    engine
        .create_table(TableDef::new("counted_table").with_key_columns(["id"]))
        .expect("counted_table");
    define_counter_cache(
        &engine,
        CounterCache::new(
            "counter_table",
            "count",
            "counted_table",
            Relationship::new([("id", "counter_id")]).expect("rel"),
        ),
    )
    .expect("define");
    engine
        .run(|txn| {
            txn.insert("counter_table", row! { "id" => 1, "count" => 0 })?;
            txn.insert("counter_table", row! { "id" => 2, "count" => 0 })
        })
        .expect("seed");

    engine
        .run(|txn| txn.insert("counted_table", row! { "id" => 1, "counter_id" => 1 }))
        .expect("insert");
    assert_eq!(count(&engine, 1), Value::Integer(1));

    engine
        .run(|txn| {
            txn.update(
                "counted_table",
                &Expr::equals("id", 1),
                &[Assignment::set("counter_id", 2)],
            )
        })
        .expect("move");
    assert_eq!(count(&engine, 1), Value::Integer(0));
    assert_eq!(count(&engine, 2), Value::Integer(1));

    engine
        .run(|txn| txn.delete("counted_table", &Expr::always()))
        .expect("delete");
    assert_eq!(count(&engine, 2), Value::Integer(0));
}

/// An order system with every rule kind installed at once. A rejected write
/// must leave caches, audit history and timestamps exactly as they were.
#[test]
fn rejected_writes_leave_no_trace() {
    init_tracing_for_tests();
    let engine = Engine::default();
    for def in [
        TableDef::new("customers").with_key_columns(["id"]),
        TableDef::new("orders").with_key_columns(["id"]),
        TableDef::new("tags").with_key_columns(["id"]),
    ] {
        engine.create_table(def).expect("table");
    }
    create_audit_table(&engine, None).expect("audit table");
    let by_customer = || Relationship::new([("id", "customer_id")]).expect("rel");

    define_counter_cache(
        &engine,
        CounterCache::new("customers", "order_count", "orders", by_customer()),
    )
    .expect("counter");
    define_sum_cache(
        &engine,
        SumCache::new("customers", "order_total", "orders", "amount", by_customer()),
    )
    .expect("sum");
    define_conditional_foreign_key(
        &engine,
        ConditionalForeignKey::new("customers", "orders", by_customer()),
    )
    .expect("fk");
    define_array_foreign_key(
        &engine,
        ArrayForeignKey::new("orders", ["tag_ids"], "tags", ["id"]),
    )
    .expect("array fk");
    define_audit_rule(&engine, AuditRule::new("orders")).expect("audit");
    define_timestamp_rule(&engine, TimestampRule::new("orders", "updated_at")).expect("stamp");

    engine
        .run(|txn| {
            txn.insert(
                "customers",
                row! { "id" => 1, "order_count" => 0, "order_total" => 0 },
            )?;
            txn.insert("tags", row! { "id" => 10 })?;
            txn.insert("tags", row! { "id" => 11 })?;
            txn.insert(
                "orders",
                row! { "id" => 1, "customer_id" => 1, "amount" => 25, "tag_ids" => vec![10, 11] },
            )
        })
        .expect("seed");

    let snapshot = |engine: &Engine| {
        engine
            .run(|txn| {
                let customers = txn.select("customers", &Expr::always())?;
                let orders = txn.select("orders", &Expr::always())?;
                let audit = audit_entries(txn, "audit_table")?;
                Ok((customers, orders, audit))
            })
            .expect("snapshot")
    };
    let before = snapshot(&engine);
    assert_eq!(before.0[0].get("order_count"), &Value::Integer(1));
    assert_eq!(before.0[0].get("order_total"), &Value::Integer(25));
    assert!(before.1[0].get("updated_at").as_timestamp().is_some());
    assert!(before.2.is_empty());

    // Unknown tag: the update is valid for every other rule.
    let err = engine
        .run(|txn| {
            txn.update(
                "orders",
                &Expr::equals("id", 1),
                &[
                    Assignment::set("amount", 40),
                    Assignment::set("tag_ids", vec![10, 12]),
                ],
            )
        })
        .expect_err("unknown tag");
    assert!(err.is_violation());
    assert_eq!(err.constraint_name(), Some("pt_afk_orders_tag_ids"));

    // Unknown customer, in a transaction that already wrote a valid order.
    let err = engine
        .run(|txn| {
            txn.insert(
                "orders",
                row! { "id" => 2, "customer_id" => 1, "amount" => 5 },
            )?;
            txn.insert(
                "orders",
                row! { "id" => 3, "customer_id" => 9, "amount" => 5 },
            )
        })
        .expect_err("unknown customer");
    assert!(matches!(err, Error::ConstraintViolation { .. }));

    let after = snapshot(&engine);
    assert_eq!(after.0, before.0);
    assert_eq!(after.1, before.1);
    assert_eq!(after.2, before.2);

    // A valid change goes through every rule.
    engine
        .run(|txn| {
            txn.update(
                "orders",
                &Expr::equals("id", 1),
                &[Assignment::set("amount", 30)],
            )
        })
        .expect("valid update");
    let (customers, _, audit) = snapshot(&engine);
    assert_eq!(customers[0].get("order_total"), &Value::Integer(30));
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].changes.get("amount"), Some(&json!(25)));
}
