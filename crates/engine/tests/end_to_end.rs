//! End-to-end scenarios: SQL in, committed Notion objects and typed rows
//! out, through the full stack (parser, compiler, transaction core,
//! in-memory client, result layer).

use serde_json::json;

use notiondb_common::Error;
use notiondb_coordinator::TransactionState;
use notiondb_engine::create_engine;
use notiondb_sql::{Params, Table, TypeEngine, Value};

const CREATE_STUDENTS: &str =
    "CREATE TABLE students (id int, name title_varchar(255), grade varchar(1))";

fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

#[test]
fn test_create_insert_select() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();

    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'Isaac Newton', 'B')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (2, 'Galileo Galilei', 'A')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql("SELECT id, name, grade FROM students", &Params::new())
        .unwrap();
    conn.commit().unwrap();

    let mut results = conn.results().unwrap();
    assert_eq!(results.len(), 4);
    let mut select = results.pop().unwrap();
    let rows = select.all();
    assert_eq!(rows.len(), 2);
    // insertion order is preserved
    assert_eq!(rows[0].get("id").unwrap(), &Value::Integer(1));
    assert_eq!(rows[0].get("name").unwrap(), &Value::from("Isaac Newton"));
    assert_eq!(rows[0].get("grade").unwrap(), &Value::from("B"));
    assert_eq!(rows[1].get("id").unwrap(), &Value::Integer(2));
    assert_eq!(rows[1].get("name").unwrap(), &Value::from("Galileo Galilei"));
    assert_eq!(rows[1].get("grade").unwrap(), &Value::from("A"));
}

#[test]
fn test_parametric_insert_is_invisible_until_commit() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'Isaac Newton', 'B')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (2, 'Galileo Galilei', 'A')",
        &Params::new(),
    )
    .unwrap();
    conn.commit().unwrap();

    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (:id, :name, :grade)",
        &params(&[
            ("id", Value::Integer(3)),
            ("name", Value::from("Newton")),
            ("grade", Value::from("C")),
        ]),
    )
    .unwrap();

    // uncommitted writes are invisible to readers of committed state
    let database_id = {
        let metadata = engine.metadata().read();
        metadata.get("students").unwrap().database_id().unwrap()
    };
    let visible = engine
        .client()
        .databases_query(json!({"database_id": database_id.to_string()}))
        .unwrap();
    assert_eq!(visible["results"].as_array().unwrap().len(), 2);

    conn.commit().unwrap();
    let visible = engine
        .client()
        .databases_query(json!({"database_id": database_id.to_string()}))
        .unwrap();
    assert_eq!(visible["results"].as_array().unwrap().len(), 3);
}

#[test]
fn test_lock_conflict_and_retry() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut setup = engine.connect();
    setup.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    setup.commit().unwrap();

    let mut a = engine.connect();
    let mut b = engine.connect();

    a.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (10, 'Ada', 'A')",
        &Params::new(),
    )
    .unwrap();

    // B wants the same exclusive lock and fails synchronously
    let err = b
        .execute_sql(
            "INSERT INTO students (id, name, grade) VALUES (11, 'Grace', 'A')",
            &Params::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::AcquireLockFailed { .. }));

    // A commits and releases; B retries successfully
    a.commit().unwrap();
    b.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (11, 'Grace', 'A')",
        &Params::new(),
    )
    .unwrap();
    b.commit().unwrap();
}

#[test]
fn test_concurrent_create_table_serializes_on_the_schema_lock() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut a = engine.connect();
    let mut b = engine.connect();

    a.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();

    // DDL from another transaction hits the schema lock, not the registry
    let err = b
        .execute_sql(
            "CREATE TABLE courses (code int, title title_varchar(80))",
            &Params::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::AcquireLockFailed { .. }));
    assert!(engine.metadata().read().get("courses").is_none());

    a.commit().unwrap();
    b.execute_sql(
        "CREATE TABLE courses (code int, title title_varchar(80))",
        &Params::new(),
    )
    .unwrap();
    b.commit().unwrap();
    assert!(engine.inspect().has_table("courses").unwrap());
}

#[test]
fn test_rollback_leaves_no_new_pages() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut setup = engine.connect();
    setup.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    setup.commit().unwrap();

    let before = {
        let database_id = engine
            .metadata()
            .read()
            .get("students")
            .unwrap()
            .database_id()
            .unwrap();
        let visible = engine
            .client()
            .databases_query(json!({"database_id": database_id.to_string()}))
            .unwrap();
        (database_id, visible["results"].as_array().unwrap().len())
    };

    let mut conn = engine.connect();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'A', 'A')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (2, 'B', 'B')",
        &Params::new(),
    )
    .unwrap();
    let tid = conn.transaction_id().unwrap();
    conn.rollback().unwrap();

    assert_eq!(
        engine.transaction_manager().state(tid),
        Some(TransactionState::Aborted)
    );
    assert!(engine
        .transaction_manager()
        .lock_manager()
        .holders("students")
        .is_empty());

    let visible = engine
        .client()
        .databases_query(json!({"database_id": before.0.to_string()}))
        .unwrap();
    assert_eq!(visible["results"].as_array().unwrap().len(), before.1);
}

#[test]
fn test_failed_commit_reverts_committed_prefix() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut setup = engine.connect();
    setup.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    setup.commit().unwrap();

    let mut conn = engine.connect();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'Kept', 'A')",
        &Params::new(),
    )
    .unwrap();
    // the unbound placeholder makes this operation fail at stage time
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (:id, :name, :grade)",
        &Params::new(),
    )
    .unwrap();

    let err = conn.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction { .. }));

    // the first insert was rolled back: nothing is visible
    let database_id = engine
        .metadata()
        .read()
        .get("students")
        .unwrap()
        .database_id()
        .unwrap();
    let visible = engine
        .client()
        .databases_query(json!({"database_id": database_id.to_string()}))
        .unwrap();
    assert!(visible["results"].as_array().unwrap().is_empty());
}

#[test]
fn test_reflection_round_trip() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(
        "CREATE TABLE students (id int, name title_varchar(255))",
        &Params::new(),
    )
    .unwrap();
    conn.commit().unwrap();

    let inspector = engine.inspect();
    assert!(inspector.has_table("students").unwrap());
    assert!(!inspector.has_table("phantoms").unwrap());

    let columns = inspector.get_columns("students").unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "_no_id", "_no_archived"]);
    assert_eq!(columns[0].engine, TypeEngine::Integer);
    assert_eq!(columns[1].engine, TypeEngine::String { is_title: true });
    assert_eq!(columns[2].engine, TypeEngine::ObjectId);
    assert_eq!(columns[3].engine, TypeEngine::ArchivalFlag);

    // a fresh shell reflects back to the original declaration
    engine.metadata().write().remove("students");
    engine
        .metadata()
        .write()
        .add(Table::unpopulated("students"))
        .unwrap();
    engine.reflect().unwrap();

    let metadata = engine.metadata().read();
    let table = metadata.get("students").unwrap();
    assert!(table.is_populated());
    assert!(table.database_id().is_some());
    assert_eq!(
        table.columns().get("name").unwrap().engine,
        TypeEngine::String { is_title: true }
    );
    assert_eq!(table.primary_key().columns(), &["_no_id"]);
}

#[test]
fn test_update_and_delete() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'Isaac Newton', 'B')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (2, 'Galileo Galilei', 'A')",
        &Params::new(),
    )
    .unwrap();
    conn.commit().unwrap();

    conn.execute_sql(
        "UPDATE students SET grade = 'A' WHERE id = 1",
        &Params::new(),
    )
    .unwrap();
    conn.commit().unwrap();

    conn.execute_sql(
        "SELECT id, grade FROM students WHERE grade = 'A'",
        &Params::new(),
    )
    .unwrap();
    conn.commit().unwrap();
    let mut select = conn.results().unwrap().pop().unwrap();
    assert_eq!(select.all().len(), 2);

    conn.execute_sql("DELETE FROM students WHERE id = 2", &Params::new())
        .unwrap();
    conn.commit().unwrap();

    conn.execute_sql("SELECT id FROM students", &Params::new())
        .unwrap();
    conn.commit().unwrap();
    let mut select = conn.results().unwrap().pop().unwrap();
    let remaining = select.all();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("id").unwrap(), &Value::Integer(1));
}

#[test]
fn test_drop_table() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.commit().unwrap();
    assert!(engine.inspect().has_table("students").unwrap());

    conn.execute_sql("DROP TABLE students", &Params::new())
        .unwrap();
    conn.commit().unwrap();

    assert!(!engine.inspect().has_table("students").unwrap());
    assert!(engine.metadata().read().get("students").is_none());
}

#[test]
fn test_composite_cursor_nextset() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.execute_sql(
        "INSERT INTO students (id, name, grade) VALUES (1, 'Isaac Newton', 'B')",
        &Params::new(),
    )
    .unwrap();
    conn.execute_sql("SELECT id FROM students", &Params::new())
        .unwrap();
    conn.commit().unwrap();

    let composite = conn.cursor().unwrap();
    let mut composite = composite.lock();
    assert_eq!(composite.sets(), 3);

    // first set: the created database object
    let first = composite.fetchone().unwrap().unwrap();
    assert_eq!(first[0], json!("database"));

    // advancing discards the rest of the current set and closes it
    assert!(composite.nextset());
    let second = composite.fetchall().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0][0], json!("page"));

    assert!(composite.nextset());
    assert_eq!(composite.rowcount(), 1);
    assert!(composite.lastrowid().is_some());

    // no further sets
    assert!(!composite.nextset());
}

#[test]
fn test_select_via_generative_insert_builder() {
    let engine = create_engine("normlite:///:memory:").unwrap();
    let mut conn = engine.connect();
    conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
    conn.commit().unwrap();

    let (statement, bound) = {
        let metadata = engine.metadata().read();
        let table = metadata.get("students").unwrap();
        let stmt = notiondb_sql::dml::insert(table)
            .values(vec![
                Value::Integer(7),
                Value::from("Marie Curie"),
                Value::from("A"),
            ])
            .unwrap();
        (stmt.to_statement(), stmt.params())
    };
    conn.execute(&statement, &bound).unwrap();
    conn.commit().unwrap();

    conn.execute_sql("SELECT id, name FROM students WHERE id = 7", &Params::new())
        .unwrap();
    conn.commit().unwrap();
    let mut select = conn.results().unwrap().pop().unwrap();
    let row = select.one().unwrap();
    assert_eq!(row.get("name").unwrap(), &Value::from("Marie Curie"));
}

#[test]
fn test_file_backed_engine_persists_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("school.db");
    let uri = format!("normlite:///{}", path.display());

    {
        let engine = create_engine(&uri).unwrap();
        let mut conn = engine.connect();
        conn.execute_sql(CREATE_STUDENTS, &Params::new()).unwrap();
        conn.execute_sql(
            "INSERT INTO students (id, name, grade) VALUES (1, 'Isaac Newton', 'B')",
            &Params::new(),
        )
        .unwrap();
        conn.commit().unwrap();
        engine.checkpoint().unwrap();
    }

    let engine = create_engine(&uri).unwrap();
    assert!(engine.inspect().has_table("students").unwrap());
    let columns = engine.inspect().get_columns("students").unwrap();
    assert_eq!(columns.len(), 5);
}
