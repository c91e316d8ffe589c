//! Query pipeline behavior: predicates, joins, distinct, ordering, limits,
//! aggregates, and the index fast path.

use engine::{Database, DatabaseOptions, QueryOutput};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const SESSION: u64 = 1;

fn open(temp: &TempDir) -> Database {
    Database::open(temp.path().join("q.sawit"), DatabaseOptions::default()).unwrap()
}

fn rows(output: QueryOutput) -> Vec<common::Row> {
    match output {
        QueryOutput::Rows(rows) => rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

fn value(output: QueryOutput) -> serde_json::Value {
    match output {
        QueryOutput::Value(v) => v,
        other => panic!("expected value, got {other:?}"),
    }
}

fn run(db: &mut Database, sql: &str) -> QueryOutput {
    db.execute_text(sql, None, SESSION)
        .unwrap_or_else(|e| panic!("{sql:?} failed: {e}"))
}

fn seed_employees(db: &mut Database) {
    run(db, "CREATE TABLE employees");
    run(db, "CREATE TABLE departments");
    run(
        db,
        "INSERT INTO employees (id, dept) VALUES (1, 10), (2, 20), (3, NULL)",
    );
    run(db, "INSERT INTO departments (id, name) VALUES (10, 'eng')");
}

#[test]
fn where_operators_filter_a_single_pass() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(
        &mut db,
        "INSERT INTO t (id, name) VALUES (1, 'apel'), (2, 'jeruk'), (3, 'mangga'), (4, NULL)",
    );

    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE id > 2")).len(), 2);
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE id BETWEEN 2 AND 3")).len(), 2);
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE id IN (1, 4)")).len(), 2);
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE name LIKE '%a%'")).len(), 2);
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE name IS NULL")).len(), 1);
    assert_eq!(
        rows(run(&mut db, "SELECT * FROM t WHERE id = 1 OR id = 3 AND name = 'mangga'")).len(),
        2
    );
}

#[test]
fn projection_picks_fields_and_star_expands() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "INSERT INTO t (a, b, c) VALUES (1, 2, 3)");

    let got = rows(run(&mut db, "SELECT a, c FROM t"));
    assert_eq!(got[0].len(), 2);
    assert_eq!(got[0]["a"], json!(1));
    assert_eq!(got[0]["c"], json!(3));

    let star = rows(run(&mut db, "SELECT * FROM t"));
    assert_eq!(star[0].len(), 3);
}

#[test]
fn order_by_is_stable_and_directional() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(
        &mut db,
        "INSERT INTO t (id, g) VALUES (1, 2), (2, 1), (3, 2), (4, 1)",
    );

    let asc = rows(run(&mut db, "SELECT * FROM t ORDER BY g"));
    let ids: Vec<i64> = asc.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    // Stable: insertion order preserved within equal keys.
    assert_eq!(ids, vec![2, 4, 1, 3]);

    let desc = rows(run(&mut db, "SELECT * FROM t ORDER BY g DESC"));
    let ids: Vec<i64> = desc.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3, 2, 4]);
}

#[test]
fn limit_offset_window_matches_slicing() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    for i in 0..20 {
        run(&mut db, &format!("INSERT INTO t (id) VALUES ({i})"));
    }

    let window = rows(run(&mut db, "SELECT * FROM t ORDER BY id LIMIT 5 OFFSET 7"));
    let ids: Vec<i64> = window.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![7, 8, 9, 10, 11]);

    assert!(rows(run(&mut db, "SELECT * FROM t LIMIT 0")).is_empty());
    assert!(rows(run(&mut db, "SELECT * FROM t ORDER BY id LIMIT 5 OFFSET 100")).is_empty());
}

#[test]
fn distinct_removes_duplicate_projected_tuples() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(
        &mut db,
        "INSERT INTO t (city, n) VALUES ('medan', 1), ('medan', 2), ('padang', 3)",
    );

    let got = rows(run(&mut db, "SELECT DISTINCT city FROM t"));
    assert_eq!(got.len(), 2);

    // Distinct keys off the projected image, not the whole row.
    let all = rows(run(&mut db, "SELECT DISTINCT city, n FROM t"));
    assert_eq!(all.len(), 3);
}

#[test]
fn left_join_null_fills_unmatched_rows() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    seed_employees(&mut db);

    let got = rows(run(
        &mut db,
        "SELECT * FROM employees LEFT JOIN departments ON employees.dept = departments.id",
    ));
    assert_eq!(got.len(), 3);

    for row in &got {
        let emp = row["employees.id"].as_i64().unwrap();
        match emp {
            1 => assert_eq!(row["departments.name"], json!("eng")),
            2 | 3 => assert_eq!(row["departments.name"], json!(null)),
            other => panic!("unexpected employee {other}"),
        }
    }
}

#[test]
fn inner_right_full_and_cross_joins() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    seed_employees(&mut db);

    let inner = rows(run(
        &mut db,
        "SELECT * FROM employees JOIN departments ON employees.dept = departments.id",
    ));
    assert_eq!(inner.len(), 1);

    let right = rows(run(
        &mut db,
        "SELECT * FROM departments RIGHT JOIN employees ON departments.id = employees.dept",
    ));
    assert_eq!(right.len(), 3);

    run(&mut db, "INSERT INTO departments (id, name) VALUES (99, 'ops')");
    let full = rows(run(
        &mut db,
        "SELECT * FROM employees FULL JOIN departments ON employees.dept = departments.id",
    ));
    // 1 match + employees 2,3 unmatched + department 99 unmatched.
    assert_eq!(full.len(), 4);

    let cross = rows(run(&mut db, "SELECT * FROM employees CROSS JOIN departments"));
    assert_eq!(cross.len(), 6);
}

#[test]
fn non_equality_join_uses_nested_loops() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE a");
    run(&mut db, "CREATE TABLE b");
    run(&mut db, "INSERT INTO a (x) VALUES (1), (5)");
    run(&mut db, "INSERT INTO b (y) VALUES (3), (4)");

    let got = rows(run(&mut db, "SELECT * FROM a JOIN b ON a.x < b.y"));
    // 1<3, 1<4.
    assert_eq!(got.len(), 2);
}

#[test]
fn join_then_filter_then_project() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    seed_employees(&mut db);

    let got = rows(run(
        &mut db,
        "SELECT employees.id FROM employees LEFT JOIN departments \
         ON employees.dept = departments.id WHERE departments.name IS NULL",
    ));
    assert_eq!(got.len(), 2);
    for row in &got {
        assert_eq!(row.len(), 1);
        assert!(row.contains_key("employees.id"));
    }
}

#[test]
fn index_fast_path_matches_full_scan() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    // Deterministic pseudo-random payload spread over several pages.
    for i in 0..100 {
        let p = (i * 7919) % 97;
        run(
            &mut db,
            &format!("INSERT INTO t (id, p, pad) VALUES ({i}, {p}, '{}')", "x".repeat(80)),
        );
    }
    // Duplicated key values as well.
    run(&mut db, "INSERT INTO t (id, p) VALUES (42, -1)");

    let scans: Vec<Vec<common::Row>> = (0..101)
        .map(|k| rows(run(&mut db, &format!("SELECT * FROM t WHERE id = {k}"))))
        .collect();

    run(&mut db, "CREATE INDEX ON t (id)");

    for (k, scan) in scans.iter().enumerate() {
        let indexed = rows(run(&mut db, &format!("SELECT * FROM t WHERE id = {k}")));
        assert_eq!(&indexed, scan, "id = {k}");
    }
}

#[test]
fn index_stays_consistent_across_mutations() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "CREATE INDEX ON t (tag)");
    run(
        &mut db,
        "INSERT INTO t (id, tag) VALUES (1, 'a'), (2, 'b'), (3, 'a')",
    );

    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE tag = 'a'")).len(), 2);

    run(&mut db, "UPDATE t SET tag = 'c' WHERE id = 1");
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE tag = 'a'")).len(), 1);
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE tag = 'c'")).len(), 1);

    run(&mut db, "DELETE FROM t WHERE tag = 'c'");
    assert!(rows(run(&mut db, "SELECT * FROM t WHERE tag = 'c'")).is_empty());

    let indexes = rows(run(&mut db, "SHOW INDEXES"));
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0]["entries"], json!(2));
}

#[test]
fn indexes_rebuild_on_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut db = open(&temp);
        run(&mut db, "CREATE TABLE t");
        run(&mut db, "CREATE INDEX ON t (id)");
        run(&mut db, "INSERT INTO t (id) VALUES (1), (2)");
        db.close().unwrap();
    }
    let mut db = open(&temp);
    let indexes = rows(run(&mut db, "SHOW INDEXES"));
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0]["entries"], json!(2));
    assert_eq!(rows(run(&mut db, "SELECT * FROM t WHERE id = 2")).len(), 1);
}

#[test]
fn aggregates_compute_over_filtered_rows() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE panen");
    run(
        &mut db,
        "INSERT INTO panen (blok, berat) VALUES ('A', 100), ('A', 200), ('B', 50), ('B', NULL)",
    );

    assert_eq!(value(run(&mut db, "SELECT COUNT(*) FROM panen")), json!(4));
    assert_eq!(value(run(&mut db, "SELECT COUNT(berat) FROM panen")), json!(3));
    assert_eq!(value(run(&mut db, "SELECT SUM(berat) FROM panen")), json!(350.0));
    assert_eq!(value(run(&mut db, "SELECT MIN(berat) FROM panen")), json!(50));
    assert_eq!(value(run(&mut db, "SELECT MAX(berat) FROM panen")), json!(200));
    assert_eq!(
        value(run(&mut db, "SELECT AVG(berat) FROM panen WHERE blok = 'A'")),
        json!(150.0)
    );
}

#[test]
fn avg_of_empty_input_is_null() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    assert_eq!(value(run(&mut db, "SELECT AVG(x) FROM t")), json!(null));
    assert_eq!(value(run(&mut db, "SELECT COUNT(*) FROM t")), json!(0));
}

#[test]
fn group_by_and_having_filter_groups() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE panen");
    run(
        &mut db,
        "INSERT INTO panen (blok, berat) VALUES ('A', 100), ('A', 200), ('B', 50)",
    );

    let grouped = rows(run(&mut db, "SELECT blok, SUM(berat) FROM panen GROUP BY blok"));
    assert_eq!(grouped.len(), 2);
    let a = grouped.iter().find(|r| r["blok"] == json!("A")).unwrap();
    assert_eq!(a["SUM(berat)"], json!(300.0));

    let heavy = rows(run(
        &mut db,
        "SELECT blok, SUM(berat) FROM panen GROUP BY blok HAVING SUM(berat) > 100",
    ));
    assert_eq!(heavy.len(), 1);
    assert_eq!(heavy[0]["blok"], json!("A"));
}

#[test]
fn explain_reports_the_plan_without_reading_data() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "INSERT INTO t (id) VALUES (1)");

    let plan = match run(&mut db, "EXPLAIN SELECT * FROM t WHERE id = 1 ORDER BY id LIMIT 3") {
        QueryOutput::Plan(plan) => plan,
        other => panic!("expected plan, got {other:?}"),
    };
    let steps: Vec<&str> = plan["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["step"].as_str().unwrap())
        .collect();
    assert_eq!(steps, vec!["SCAN", "SORT", "LIMIT", "PROJECT"]);

    run(&mut db, "CREATE INDEX ON t (id)");
    let plan = match run(&mut db, "EXPLAIN SELECT * FROM t WHERE id = 1") {
        QueryOutput::Plan(plan) => plan,
        other => panic!("expected plan, got {other:?}"),
    };
    assert_eq!(plan["steps"][0]["step"], json!("INDEX SCAN"));
}

#[test]
fn dialect_queries_behave_identically() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "BUAT TABEL panen");
    run(&mut db, "TAMBAH KE panen (blok, berat) NILAI ('A1', 750)");

    let got = rows(run(&mut db, "AMBIL * DARI panen DIMANA blok = 'A1'"));
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["berat"], json!(750));

    run(&mut db, "UBAH panen JADI berat = 800 DIMANA blok = 'A1'");
    let got = rows(run(&mut db, "SELECT * FROM panen"));
    assert_eq!(got[0]["berat"], json!(800));
}

#[test]
fn parameters_bind_through_execution() {
    let temp = TempDir::new().unwrap();
    let mut db = open(&temp);
    run(&mut db, "CREATE TABLE t");
    run(&mut db, "INSERT INTO t (id) VALUES (7)");

    let params: std::collections::HashMap<String, serde_json::Value> =
        [("id".to_string(), json!(7))].into();
    let got = match db
        .execute_text("SELECT * FROM t WHERE id = @id", Some(&params), SESSION)
        .unwrap()
    {
        QueryOutput::Rows(rows) => rows,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(got.len(), 1);
}
