use super::*;
use serde_json::json;

fn parse_ok(text: &str) -> Command {
    parse(text, None).unwrap_or_else(|e| panic!("parse of {text:?} failed: {e}"))
}

fn row(pairs: &[(&str, Value)]) -> Row {
    let mut r = Row::new();
    for (k, v) in pairs {
        r.insert((*k).to_string(), v.clone());
    }
    r
}

#[test]
fn empty_input_parses_to_empty() {
    assert_eq!(parse_ok(""), Command::Empty);
    assert_eq!(parse_ok("   \n\t "), Command::Empty);
}

#[test]
fn create_and_drop_table() {
    assert_eq!(
        parse_ok("CREATE TABLE panen"),
        Command::CreateTable { table: "panen".into() }
    );
    assert_eq!(
        parse_ok("DROP TABLE panen"),
        Command::DropTable { table: "panen".into() }
    );
}

#[test]
fn insert_builds_rows_from_field_list() {
    let cmd = parse_ok("INSERT INTO t (id, name) VALUES (1, 'A')");
    assert_eq!(
        cmd,
        Command::Insert {
            table: "t".into(),
            rows: vec![row(&[("id", json!(1)), ("name", json!("A"))])],
        }
    );
}

#[test]
fn multi_row_insert() {
    let cmd = parse_ok("INSERT INTO t (id) VALUES (1), (2), (3)");
    match cmd {
        Command::Insert { rows, .. } => assert_eq!(rows.len(), 3),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn insert_arity_mismatch_is_an_error() {
    assert!(parse("INSERT INTO t (id, name) VALUES (1)", None).is_err());
}

#[test]
fn select_star_with_predicate() {
    let cmd = parse_ok("SELECT * FROM t WHERE id = 1");
    match cmd {
        Command::Select(select) => {
            assert_eq!(select.table, "t");
            assert_eq!(select.items, vec![SelectItem::Wildcard]);
            assert_eq!(
                select.criteria,
                Some(Criteria::Compare {
                    field: "id".into(),
                    op: CompareOp::Eq,
                    value: json!(1),
                })
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn and_binds_tighter_than_or() {
    let cmd = parse_ok("SELECT * FROM t WHERE a = 1 AND b = 2 OR c = 3");
    match cmd {
        Command::Select(select) => match select.criteria.unwrap() {
            Criteria::Or(nodes) => {
                assert_eq!(nodes.len(), 2);
                assert!(matches!(&nodes[0], Criteria::And(pair) if pair.len() == 2));
                assert!(matches!(&nodes[1], Criteria::Compare { field, .. } if field == "c"));
            }
            other => panic!("expected OR root, got {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn between_in_like_null_conditions() {
    let cmd = parse_ok(
        "SELECT * FROM t WHERE a BETWEEN 1 AND 5 AND b IN (1, 2) AND c NOT IN ('x') \
         AND d LIKE 'a%' AND e IS NULL AND f IS NOT NULL",
    );
    match cmd {
        Command::Select(select) => match select.criteria.unwrap() {
            Criteria::And(nodes) => {
                assert_eq!(nodes.len(), 6);
                assert!(matches!(&nodes[0], Criteria::Between { low, high, .. }
                        if *low == json!(1) && *high == json!(5)));
                assert!(matches!(&nodes[1], Criteria::In { negated: false, .. }));
                assert!(matches!(&nodes[2], Criteria::In { negated: true, .. }));
                assert!(matches!(&nodes[3], Criteria::Like { pattern, .. } if pattern == "a%"));
                assert!(matches!(&nodes[4], Criteria::IsNull { negated: false, .. }));
                assert!(matches!(&nodes[5], Criteria::IsNull { negated: true, .. }));
            }
            other => panic!("expected AND root, got {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn order_limit_offset_distinct() {
    let cmd = parse_ok("SELECT DISTINCT name FROM t ORDER BY name DESC LIMIT 10 OFFSET 5");
    match cmd {
        Command::Select(select) => {
            assert!(select.distinct);
            assert_eq!(
                select.order_by,
                Some(OrderBy {
                    field: "name".into(),
                    direction: SortDirection::Desc,
                })
            );
            assert_eq!(select.limit, Some(10));
            assert_eq!(select.offset, Some(5));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn joins_parse_with_qualified_fields() {
    let cmd = parse_ok(
        "SELECT * FROM employees LEFT JOIN departments ON employees.dept = departments.id",
    );
    match cmd {
        Command::Select(select) => {
            assert_eq!(select.joins.len(), 1);
            let join = &select.joins[0];
            assert_eq!(join.kind, JoinKind::Left);
            assert_eq!(join.table, "departments");
            assert_eq!(
                join.on,
                Some(JoinCondition {
                    left: "employees.dept".into(),
                    op: CompareOp::Eq,
                    right: "departments.id".into(),
                })
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn cross_join_takes_no_condition() {
    let cmd = parse_ok("SELECT * FROM a CROSS JOIN b");
    match cmd {
        Command::Select(select) => {
            assert_eq!(select.joins[0].kind, JoinKind::Cross);
            assert!(select.joins[0].on.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn aggregates_become_aggregate_commands() {
    let cmd = parse_ok("SELECT COUNT(*) FROM t WHERE x > 3");
    match cmd {
        Command::Aggregate(agg) => {
            assert_eq!(agg.func, AggFunc::Count);
            assert_eq!(agg.field, None);
            assert!(agg.criteria.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }

    let cmd = parse_ok("SELECT dept, SUM(salary) FROM emp GROUP BY dept HAVING SUM(salary) > 100");
    match cmd {
        Command::Aggregate(agg) => {
            assert_eq!(agg.func, AggFunc::Sum);
            assert_eq!(agg.field.as_deref(), Some("salary"));
            assert_eq!(agg.group_by.as_deref(), Some("dept"));
            assert_eq!(agg.having, Some((CompareOp::Gt, json!(100))));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn update_and_delete() {
    assert_eq!(
        parse_ok("UPDATE t SET name = 'B' WHERE id = 1"),
        Command::Update {
            table: "t".into(),
            assignments: vec![("name".into(), json!("B"))],
            criteria: Some(Criteria::Compare {
                field: "id".into(),
                op: CompareOp::Eq,
                value: json!(1),
            }),
        }
    );
    assert_eq!(
        parse_ok("DELETE FROM t"),
        Command::Delete { table: "t".into(), criteria: None }
    );
}

#[test]
fn transactions_and_explain() {
    assert_eq!(parse_ok("BEGIN"), Command::Begin);
    assert_eq!(parse_ok("COMMIT"), Command::Commit);
    assert_eq!(parse_ok("ROLLBACK"), Command::Rollback);
    match parse_ok("EXPLAIN SELECT * FROM t") {
        Command::Explain(inner) => assert!(matches!(*inner, Command::Select(_))),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn ddl_for_views_triggers_procedures_schemas() {
    match parse_ok("CREATE VIEW v AS SELECT * FROM t WHERE x = 1") {
        Command::CreateView { name, query } => {
            assert_eq!(name, "v");
            assert_eq!(query.table, "t");
        }
        other => panic!("unexpected {other:?}"),
    }

    match parse_ok("CREATE TRIGGER tr BEFORE INSERT ON t DO 'INSERT INTO log (x) VALUES (1)'") {
        Command::CreateTrigger { name, table, timing, event, statement } => {
            assert_eq!(name, "tr");
            assert_eq!(table, "t");
            assert_eq!(timing, TriggerTiming::Before);
            assert_eq!(event, TriggerEvent::Insert);
            assert!(statement.starts_with("INSERT"));
        }
        other => panic!("unexpected {other:?}"),
    }

    match parse_ok("CREATE PROCEDURE p AS 'SELECT * FROM t', 'DELETE FROM t'") {
        Command::CreateProcedure { name, statements } => {
            assert_eq!(name, "p");
            assert_eq!(statements.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    match parse_ok("DEFINE SCHEMA t (umur NUMBER REQUIRED, aktif BOOLEAN DEFAULT TRUE)") {
        Command::DefineSchema { table, fields } => {
            assert_eq!(table, "t");
            assert_eq!(fields[0].kind, FieldKind::Number);
            assert!(fields[0].required);
            assert_eq!(fields[1].default, Some(json!(true)));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn backup_and_restore() {
    assert_eq!(
        parse_ok("BACKUP TO '/tmp/b.sawit'"),
        Command::Backup { path: "/tmp/b.sawit".into() }
    );
    assert_eq!(
        parse_ok("RESTORE FROM '/tmp/b.sawit'"),
        Command::Restore { path: "/tmp/b.sawit".into() }
    );
}

#[test]
fn dialect_parses_to_identical_commands() {
    let pairs = [
        ("AMBIL * DARI t DIMANA id = 1", "SELECT * FROM t WHERE id = 1"),
        (
            "TAMBAH KE t (id, nama) NILAI (1, 'A')",
            "INSERT INTO t (id, nama) VALUES (1, 'A')",
        ),
        ("UBAH t JADI nama = 'B' DIMANA id = 1", "UPDATE t SET nama = 'B' WHERE id = 1"),
        ("HAPUS DARI t DIMANA id = 1", "DELETE FROM t WHERE id = 1"),
        ("HAPUS TABEL panen", "DROP TABLE panen"),
        ("HAPUS PANDANGAN v", "DROP VIEW v"),
        ("BUAT TABEL panen", "CREATE TABLE panen"),
        ("MULAI", "BEGIN"),
        ("SIMPAN", "COMMIT"),
        ("BATAL", "ROLLBACK"),
        (
            "AMBIL JUMLAH(*) DARI t KELOMPOK BERDASAR blok",
            "SELECT COUNT(*) FROM t GROUP BY blok",
        ),
        (
            "JELASKAN AMBIL * DARI t DIMANA id = 1",
            "EXPLAIN SELECT * FROM t WHERE id = 1",
        ),
        (
            "AMBIL UNIK nama DARI t URUT BERDASAR nama TURUN BATAS 5 GESER 2",
            "SELECT DISTINCT nama FROM t ORDER BY nama DESC LIMIT 5 OFFSET 2",
        ),
    ];
    for (dialect, english) in pairs {
        assert_eq!(parse_ok(dialect), parse_ok(english), "{dialect}");
    }
}

#[test]
fn parameters_bind_when_supplied() {
    let params: std::collections::HashMap<String, Value> =
        [("id".to_string(), json!(7)), ("nm".to_string(), json!("X"))].into();

    let cmd = parse("SELECT * FROM t WHERE id = @id", Some(&params)).unwrap();
    match cmd {
        Command::Select(select) => assert_eq!(
            select.criteria,
            Some(Criteria::Compare { field: "id".into(), op: CompareOp::Eq, value: json!(7) })
        ),
        other => panic!("unexpected {other:?}"),
    }

    let cmd = parse("INSERT INTO t (id, name) VALUES (@id, @nm)", Some(&params)).unwrap();
    match cmd {
        Command::Insert { rows, .. } => {
            assert_eq!(rows[0]["id"], json!(7));
            assert_eq!(rows[0]["name"], json!("X"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unbound_parameters_stay_literal() {
    let params = std::collections::HashMap::new();
    let cmd = parse("SELECT * FROM t WHERE id = @missing", Some(&params)).unwrap();
    match cmd {
        Command::Select(select) => assert_eq!(
            select.criteria,
            Some(Criteria::Compare {
                field: "id".into(),
                op: CompareOp::Eq,
                value: json!("@missing"),
            })
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn negative_and_decimal_numbers() {
    let cmd = parse_ok("SELECT * FROM t WHERE a = -5 OR b = 2.75");
    match cmd {
        Command::Select(select) => match select.criteria.unwrap() {
            Criteria::Or(nodes) => {
                assert!(matches!(&nodes[0], Criteria::Compare { value, .. } if *value == json!(-5)));
                assert!(matches!(&nodes[1], Criteria::Compare { value, .. } if *value == json!(2.75)));
            }
            other => panic!("expected OR, got {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn string_escapes_resolve() {
    let cmd = parse_ok(r#"INSERT INTO t (a) VALUES ('it\'s')"#);
    match cmd {
        Command::Insert { rows, .. } => assert_eq!(rows[0]["a"], json!("it's")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn errors_are_values_not_panics() {
    for bad in [
        "SELECT",
        "SELECT * FORM t",
        "INSERT INTO t VALUES (1)",
        "UPDATE t SET",
        "CREATE",
        "WHERE x = 1",
        "SELECT * FROM t WHERE a ~ 1",
        "SELECT * FROM t LIMIT 'x'",
    ] {
        assert!(parse(bad, None).is_err(), "{bad:?} should fail");
    }
}

#[test]
fn server_statements_are_recognized_in_both_dialects() {
    assert_eq!(
        parse_server_statement("CREATE DATABASE kebun"),
        Some(ServerCommand::CreateDatabase("kebun".into()))
    );
    assert_eq!(
        parse_server_statement("BUAT BASISDATA kebun"),
        Some(ServerCommand::CreateDatabase("kebun".into()))
    );
    assert_eq!(
        parse_server_statement("GUNAKAN kebun"),
        Some(ServerCommand::UseDatabase("kebun".into()))
    );
    assert_eq!(
        parse_server_statement("TAMPILKAN SEMUA_BASISDATA"),
        Some(ServerCommand::ShowDatabases)
    );
    assert_eq!(
        parse_server_statement("HAPUS BASISDATA kebun"),
        Some(ServerCommand::DropDatabase("kebun".into()))
    );
    assert_eq!(parse_server_statement("SELECT * FROM t"), None);
}

#[test]
fn like_patterns_translate_safely() {
    let re = like_to_regex("a%").unwrap();
    assert!(re.is_match("abc"));
    assert!(re.is_match("A"));
    assert!(!re.is_match("ba"));

    let re = like_to_regex("h_llo").unwrap();
    assert!(re.is_match("hello"));
    assert!(!re.is_match("heello"));

    // Regex metacharacters in the pattern are literal.
    let re = like_to_regex("1.5%").unwrap();
    assert!(re.is_match("1.50"));
    assert!(!re.is_match("1x50"));
}

#[test]
fn non_ascii_outside_strings_is_rejected() {
    assert!(tokenize("SELECT ∑ FROM t").is_err());
    // But inside string literals it passes through.
    let tokens = tokenize("'buah é nanas'").unwrap();
    assert_eq!(tokens, vec![Token::Str("buah é nanas".into())]);
}

#[test]
fn tokenizer_recognizes_dotted_identifiers_and_params() {
    let tokens = tokenize("a.b @p 'x' <= 3").unwrap();
    assert_eq!(
        tokens,
        vec![
            Token::Ident("a.b".into()),
            Token::Param("p".into()),
            Token::Str("x".into()),
            Token::Operator("<=".into()),
            Token::Number(serde_json::Number::from(3)),
        ]
    );
}
