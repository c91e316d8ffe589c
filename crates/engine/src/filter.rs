//! Predicate evaluation over JSON rows.
//!
//! Criteria trees are compiled once per statement (LIKE patterns become
//! anchored regexes up front) and then evaluated per row with short-circuit
//! AND/OR. Comparisons between values of different kinds are simply false.

use common::value::{value_cmp, values_equal};
use common::{DbResult, Row};
use parser::{like_to_regex, CompareOp, Criteria};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// A criteria tree with LIKE patterns pre-compiled.
#[derive(Debug)]
pub(crate) enum CompiledCriteria {
    Compare { field: String, op: CompareOp, value: Value },
    Between { field: String, low: Value, high: Value },
    In { field: String, values: Vec<Value>, negated: bool },
    Like { field: String, regex: Regex },
    IsNull { field: String, negated: bool },
    And(Vec<CompiledCriteria>),
    Or(Vec<CompiledCriteria>),
}

pub(crate) fn compile(criteria: &Criteria) -> DbResult<CompiledCriteria> {
    Ok(match criteria {
        Criteria::Compare { field, op, value } => CompiledCriteria::Compare {
            field: field.clone(),
            op: *op,
            value: value.clone(),
        },
        Criteria::Between { field, low, high } => CompiledCriteria::Between {
            field: field.clone(),
            low: low.clone(),
            high: high.clone(),
        },
        Criteria::In { field, values, negated } => CompiledCriteria::In {
            field: field.clone(),
            values: values.clone(),
            negated: *negated,
        },
        Criteria::Like { field, pattern } => CompiledCriteria::Like {
            field: field.clone(),
            regex: like_to_regex(pattern)?,
        },
        Criteria::IsNull { field, negated } => CompiledCriteria::IsNull {
            field: field.clone(),
            negated: *negated,
        },
        Criteria::And(children) => {
            CompiledCriteria::And(children.iter().map(compile).collect::<DbResult<_>>()?)
        }
        Criteria::Or(children) => {
            CompiledCriteria::Or(children.iter().map(compile).collect::<DbResult<_>>()?)
        }
    })
}

/// Resolve a possibly-qualified field name against a row. Joined rows carry
/// `table.column` keys, so an unqualified name falls back to a unique
/// `.column` suffix match.
pub(crate) fn get_field<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(name) {
        return Some(value);
    }
    if !name.contains('.') {
        let suffix = format!(".{name}");
        let mut hit = None;
        for (key, value) in row {
            if key.ends_with(&suffix) {
                if hit.is_some() {
                    return None; // ambiguous
                }
                hit = Some(value);
            }
        }
        return hit;
    }
    None
}

pub(crate) fn eval(criteria: &CompiledCriteria, row: &Row) -> bool {
    match criteria {
        CompiledCriteria::Compare { field, op, value } => {
            let actual = match get_field(row, field) {
                Some(v) => v,
                None => return false,
            };
            compare(actual, *op, value)
        }
        CompiledCriteria::Between { field, low, high } => match get_field(row, field) {
            Some(actual) => {
                value_cmp(actual, low).is_some_and(|o| o != Ordering::Less)
                    && value_cmp(actual, high).is_some_and(|o| o != Ordering::Greater)
            }
            None => false,
        },
        CompiledCriteria::In { field, values, negated } => {
            let hit = match get_field(row, field) {
                Some(actual) => values.iter().any(|v| values_equal(actual, v)),
                None => false,
            };
            hit != *negated
        }
        CompiledCriteria::Like { field, regex } => match get_field(row, field) {
            Some(Value::String(text)) => regex.is_match(text),
            _ => false,
        },
        CompiledCriteria::IsNull { field, negated } => {
            let is_null = matches!(get_field(row, field), None | Some(Value::Null));
            is_null != *negated
        }
        CompiledCriteria::And(children) => children.iter().all(|c| eval(c, row)),
        CompiledCriteria::Or(children) => children.iter().any(|c| eval(c, row)),
    }
}

/// Single comparison over the supported operator set.
pub(crate) fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Lt => value_cmp(actual, expected) == Some(Ordering::Less),
        CompareOp::Gt => value_cmp(actual, expected) == Some(Ordering::Greater),
        CompareOp::Le => {
            matches!(value_cmp(actual, expected), Some(Ordering::Less | Ordering::Equal))
        }
        CompareOp::Ge => {
            matches!(value_cmp(actual, expected), Some(Ordering::Greater | Ordering::Equal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    fn matches_where(clause: &str, r: &Row) -> bool {
        let cmd = parser::parse(&format!("SELECT * FROM t WHERE {clause}"), None).unwrap();
        let criteria = match cmd {
            parser::Command::Select(s) => s.criteria.unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        eval(&compile(&criteria).unwrap(), r)
    }

    #[test]
    fn inline_comparisons() {
        let r = row(&[("id", json!(5)), ("name", json!("Budi"))]);
        assert!(matches_where("id = 5", &r));
        assert!(matches_where("id != 4", &r));
        assert!(matches_where("id > 4", &r));
        assert!(matches_where("id <= 5", &r));
        assert!(!matches_where("id < 5", &r));
        assert!(matches_where("name = 'Budi'", &r));
    }

    #[test]
    fn cross_type_comparisons_are_false() {
        let r = row(&[("id", json!("5"))]);
        assert!(!matches_where("id = 5", &r));
        assert!(!matches_where("id > 4", &r));
    }

    #[test]
    fn and_or_short_circuit_tree() {
        let r = row(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]);
        assert!(matches_where("a = 1 AND b = 2", &r));
        assert!(matches_where("a = 9 OR c = 3", &r));
        assert!(matches_where("a = 9 AND b = 2 OR c = 3", &r));
        assert!(!matches_where("a = 9 OR b = 9", &r));
    }

    #[test]
    fn between_is_inclusive() {
        let r = row(&[("x", json!(5))]);
        assert!(matches_where("x BETWEEN 5 AND 10", &r));
        assert!(matches_where("x BETWEEN 1 AND 5", &r));
        assert!(!matches_where("x BETWEEN 6 AND 10", &r));
    }

    #[test]
    fn in_and_not_in() {
        let r = row(&[("x", json!(2))]);
        assert!(matches_where("x IN (1, 2, 3)", &r));
        assert!(!matches_where("x NOT IN (1, 2, 3)", &r));
        assert!(matches_where("x NOT IN (7, 8)", &r));
    }

    #[test]
    fn like_is_case_insensitive() {
        let r = row(&[("name", json!("Mangga Dua"))]);
        assert!(matches_where("name LIKE 'mangga%'", &r));
        assert!(matches_where("name LIKE '%dua'", &r));
        assert!(matches_where("name LIKE 'Mangga _ua'", &r));
        assert!(!matches_where("name LIKE 'dua%'", &r));
    }

    #[test]
    fn null_tests_cover_missing_fields() {
        let r = row(&[("a", json!(null)), ("b", json!(1))]);
        assert!(matches_where("a IS NULL", &r));
        assert!(matches_where("missing IS NULL", &r));
        assert!(matches_where("b IS NOT NULL", &r));
        assert!(!matches_where("b IS NULL", &r));
    }

    #[test]
    fn qualified_lookup_falls_back_to_suffix() {
        let r = row(&[("emp.id", json!(1)), ("dept.id", json!(10)), ("dept.name", json!("eng"))]);
        assert_eq!(get_field(&r, "dept.name"), Some(&json!("eng")));
        assert_eq!(get_field(&r, "name"), Some(&json!("eng")));
        // Ambiguous unqualified name resolves to nothing.
        assert_eq!(get_field(&r, "id"), None);
    }
}
