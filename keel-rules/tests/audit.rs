use keel_expr::Expr;
use keel_rules::{AuditEntry, AuditRule, audit_entries, create_audit_table, define_audit_rule};
use keel_runtime::{Assignment, Engine, TableDef};
use keel_test_utils::init_tracing_for_tests;
use keel_types::{Value, row};
use serde_json::{Value as JsonValue, json};
use time::macros::datetime;

fn setup(rule: AuditRule) -> Engine {
    init_tracing_for_tests();
    let engine = Engine::default();
    engine
        .create_table(TableDef::new("audited_table").with_key_columns(["id"]))
        .expect("audited_table");
    let audit_table = create_audit_table(&engine, None).expect("audit table");
    assert_eq!(audit_table, "audit_table");
    let name = define_audit_rule(&engine, rule).expect("define");
    assert_eq!(name, "pt_audit_audited_table");
    engine
        .run(|txn| {
            txn.insert(
                "audited_table",
                row! { "id" => 1, "description" => Value::Null, "item_count" => 0 },
            )
        })
        .expect("seed");
    engine
}

fn entries(engine: &Engine) -> Vec<AuditEntry> {
    engine
        .run(|txn| audit_entries(txn, "audit_table"))
        .expect("entries")
}

fn set(engine: &Engine, column: &str, value: Value) {
    engine
        .run(|txn| {
            txn.update(
                "audited_table",
                &Expr::equals("id", 1),
                &[Assignment::set(column, value)],
            )
        })
        .expect("update");
}

fn changes(entry: &AuditEntry) -> JsonValue {
    JsonValue::Object(entry.changes.clone())
}

#[test]
fn updates_record_prior_values() {
    let engine = setup(AuditRule::new("audited_table"));
    assert!(entries(&engine).is_empty(), "inserts are not audited");

    set(&engine, "item_count", Value::from(1));
    set(&engine, "description", Value::from("blah"));
    set(&engine, "description", Value::from("blah blah"));
    set(&engine, "item_count", Value::from(2));

    let recorded = entries(&engine);
    let diffs: Vec<JsonValue> = recorded.iter().map(changes).collect();
    assert_eq!(
        diffs,
        vec![
            json!({ "item_count": 0 }),
            json!({ "description": null }),
            json!({ "description": "blah" }),
            json!({ "item_count": 1 }),
        ]
    );
    assert!(recorded.iter().all(|e| e.table_name == "audited_table" && !e.deleted));
    assert!(recorded.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn unchanged_update_records_nothing() {
    let engine = setup(AuditRule::new("audited_table"));
    set(&engine, "item_count", Value::from(0));
    assert!(entries(&engine).is_empty());
}

#[test]
fn delete_records_the_whole_row() {
    let engine = setup(AuditRule::new("audited_table"));
    let mut txn = engine
        .begin_at(datetime!(2024-05-06 07:08:09 UTC))
        .expect("begin");
    txn.delete("audited_table", &Expr::equals("id", 1))
        .expect("delete");
    txn.commit().expect("commit");

    let recorded = entries(&engine);
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].deleted);
    assert_eq!(recorded[0].changed_at, datetime!(2024-05-06 07:08:09 UTC));
    assert_eq!(
        changes(&recorded[0]),
        json!({ "id": 1, "description": null, "item_count": 0 })
    );
}

#[test]
fn ignored_and_included_columns() {
    let engine = setup(
        AuditRule::new("audited_table")
            .with_ignore(["item_count"])
            .with_include(["id"]),
    );
    set(&engine, "item_count", Value::from(5));
    assert!(entries(&engine).is_empty(), "only ignored columns changed");

    set(&engine, "description", Value::from("x"));
    let recorded = entries(&engine);
    assert_eq!(recorded.len(), 1);
    assert_eq!(changes(&recorded[0]), json!({ "id": 1, "description": null }));
}

#[test]
fn redefining_replaces_the_rule() {
    let engine = setup(AuditRule::new("audited_table"));
    define_audit_rule(
        &engine,
        AuditRule::new("audited_table").with_ignore(["description"]),
    )
    .expect("redefine");
    assert_eq!(engine.triggers_on("audited_table").expect("list").len(), 1);

    set(&engine, "description", Value::from("ignored now"));
    assert!(entries(&engine).is_empty());
    set(&engine, "item_count", Value::from(3));
    assert_eq!(entries(&engine).len(), 1);
}

#[test]
fn rolled_back_changes_leave_no_entries() {
    let engine = setup(AuditRule::new("audited_table"));
    let mut txn = engine.begin().expect("begin");
    txn.update(
        "audited_table",
        &Expr::equals("id", 1),
        &[Assignment::set("item_count", 9)],
    )
    .expect("update");
    txn.rollback().expect("rollback");
    assert!(entries(&engine).is_empty());
}

#[test]
fn auditing_into_itself_or_an_unknown_table_is_rejected() {
    init_tracing_for_tests();
    let engine = Engine::default();
    engine
        .create_table(TableDef::new("audited_table"))
        .expect("audited_table");
    assert!(define_audit_rule(&engine, AuditRule::new("audited_table")).is_err());
    assert!(
        define_audit_rule(
            &engine,
            AuditRule::new("audited_table").with_audit_table("audited_table"),
        )
        .is_err()
    );
}
