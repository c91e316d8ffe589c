//! System-table services: schemas, views, triggers, procedures, stats.

use engine::{Database, DatabaseOptions, QueryOutput};
use serde_json::json;
use tempfile::TempDir;

const SESSION: u64 = 1;

fn open(temp: &TempDir) -> Database {
    Database::open(temp.path().join("m.sawit"), DatabaseOptions::default()).unwrap()
}

fn rows(output: QueryOutput) -> Vec<common::Row> {
    match output {
        QueryOutput::Rows(rows) => rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

fn run(db: &mut Database, sql: &str) -> QueryOutput {
    db.execute_text(sql, None, SESSION)
        .unwrap_or_else(|e| panic!("{sql:?} failed: {e}"))
}

#[test]
fn schema_coerces_inserted_rows() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE pohon");
    run(
        &mut db,
        "DEFINE SCHEMA pohon (umur NUMBER REQUIRED, aktif BOOLEAN DEFAULT TRUE, tanam DATE)",
    );

    run(
        &mut db,
        "INSERT INTO pohon (umur, aktif, tanam) VALUES ('12', 'false', '2020/3/5')",
    );
    let got = rows(run(&mut db, "SELECT * FROM pohon"));
    assert_eq!(got[0]["umur"], json!(12));
    assert_eq!(got[0]["aktif"], json!(false));
    assert_eq!(got[0]["tanam"], json!("2020-03-05"));

    // Default fills, required enforces.
    run(&mut db, "INSERT INTO pohon (umur) VALUES (3)");
    let got = rows(run(&mut db, "SELECT * FROM pohon WHERE umur = 3"));
    assert_eq!(got[0]["aktif"], json!(true));

    assert!(db
        .execute_text("INSERT INTO pohon (aktif) VALUES (TRUE)", None, SESSION)
        .is_err());
}

#[test]
fn schema_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut db = open(&temp);
        run(&mut db, "CREATE TABLE t");
        run(&mut db, "DEFINE SCHEMA t (n NUMBER REQUIRED)");
        db.close().unwrap();
    }
    let mut db = open(&temp);
    assert!(db.execute_text("INSERT INTO t (x) VALUES (1)", None, SESSION).is_err());
    run(&mut db, "INSERT INTO t (n) VALUES ('5')");
    assert_eq!(rows(run(&mut db, "SELECT * FROM t"))[0]["n"], json!(5));
}

#[test]
fn views_substitute_their_stored_select() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE panen");
    run(
        &mut db,
        "INSERT INTO panen (blok, berat) VALUES ('A', 900), ('B', 100), ('C', 800)",
    );
    run(&mut db, "CREATE VIEW berat_besar AS SELECT * FROM panen WHERE berat > 500");

    let got = rows(run(&mut db, "SELECT * FROM berat_besar"));
    assert_eq!(got.len(), 2);

    // Outer criteria stack on top of the view.
    let got = rows(run(&mut db, "SELECT * FROM berat_besar WHERE blok = 'A'"));
    assert_eq!(got.len(), 1);

    run(&mut db, "DROP VIEW berat_besar");
    assert!(db.execute_text("SELECT * FROM berat_besar", None, SESSION).is_err());
}

#[test]
fn views_survive_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut db = open(&temp);
        run(&mut db, "CREATE TABLE t");
        run(&mut db, "INSERT INTO t (x) VALUES (1), (2)");
        run(&mut db, "CREATE VIEW just_one AS SELECT * FROM t WHERE x = 1");
        db.close().unwrap();
    }
    let mut db = open(&temp);
    assert_eq!(rows(run(&mut db, "SELECT * FROM just_one")).len(), 1);
}

#[test]
fn triggers_fire_and_failures_are_swallowed() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE panen");
    run(&mut db, "CREATE TABLE log");
    run(
        &mut db,
        "CREATE TRIGGER catat AFTER INSERT ON panen DO 'INSERT INTO log (pesan) VALUES (1)'",
    );

    run(&mut db, "INSERT INTO panen (blok) VALUES ('A')");
    run(&mut db, "INSERT INTO panen (blok) VALUES ('B')");
    assert_eq!(rows(run(&mut db, "SELECT * FROM log")).len(), 2);

    // A failing trigger never aborts the outer statement.
    run(
        &mut db,
        "CREATE TRIGGER rusak BEFORE INSERT ON panen DO 'INSERT INTO tidak_ada (x) VALUES (1)'",
    );
    run(&mut db, "INSERT INTO panen (blok) VALUES ('C')");
    assert_eq!(rows(run(&mut db, "SELECT * FROM panen")).len(), 3);
    assert_eq!(rows(run(&mut db, "SELECT * FROM log")).len(), 3);

    run(&mut db, "DROP TRIGGER catat");
    run(&mut db, "INSERT INTO panen (blok) VALUES ('D')");
    assert_eq!(rows(run(&mut db, "SELECT * FROM log")).len(), 3);
}

#[test]
fn procedures_replay_their_statements() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(
        &mut db,
        "CREATE PROCEDURE seed AS 'INSERT INTO t (x) VALUES (1)', 'INSERT INTO t (x) VALUES (2)'",
    );

    run(&mut db, "EXEC seed");
    assert_eq!(rows(run(&mut db, "SELECT * FROM t")).len(), 2);
    run(&mut db, "EXEC seed");
    assert_eq!(rows(run(&mut db, "SELECT * FROM t")).len(), 4);

    assert!(db.execute_text("EXEC unknown", None, SESSION).is_err());
}

#[test]
fn show_stats_reports_counters() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "INSERT INTO t (x) VALUES (1)");

    let stats = match run(&mut db, "SHOW STATS") {
        QueryOutput::Value(v) => v,
        other => panic!("expected value, got {other:?}"),
    };
    assert!(stats["pages"].as_u64().unwrap() >= 2);
    assert!(stats["tables"].as_u64().unwrap() >= 2);
}

#[test]
fn duplicate_metadata_names_are_rejected() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "CREATE VIEW v AS SELECT * FROM t");
    assert!(db
        .execute_text("CREATE VIEW v AS SELECT * FROM t", None, SESSION)
        .is_err());
    assert!(db.execute_text("CREATE TABLE t", None, SESSION).is_err());

    run(&mut db, "CREATE INDEX ON t (x)");
    assert!(db.execute_text("CREATE INDEX ON t (x)", None, SESSION).is_err());
}

#[test]
fn audit_log_records_mutations() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("a.sawit");
    let options = DatabaseOptions {
        audit: true,
        ..DatabaseOptions::default()
    };
    let mut db = Database::open(&path, options).unwrap();
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "INSERT INTO t (x) VALUES (1)");
    run(&mut db, "DELETE FROM t");

    let audit = std::fs::read_to_string(temp.path().join("a.audit")).unwrap();
    let lines: Vec<&str> = audit.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["op"], json!("insert"));
    assert_eq!(first["table"], json!("t"));
}
