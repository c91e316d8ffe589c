//! Schema coercion applied at write time.
//!
//! Tables are schema-less until a `DEFINE SCHEMA` record exists. With one,
//! every inserted or updated row passes through here: required fields must
//! be present (defaults fill the gaps), declared fields coerce to their
//! kind, and unknown fields pass through untouched.

use common::{DbError, DbResult, Row};
use parser::{FieldKind, SchemaField};
use serde_json::{json, Value};

pub(crate) fn coerce_row(schema: &[SchemaField], row: &Row) -> DbResult<Row> {
    let mut out = row.clone();
    for field in schema {
        match out.get(&field.name) {
            None | Some(Value::Null) => {
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                } else if field.required {
                    return Err(DbError::Constraint(format!(
                        "required field '{}' is missing",
                        field.name
                    )));
                }
            }
            Some(value) => {
                let coerced = coerce_value(field.kind, value).ok_or_else(|| {
                    DbError::Constraint(format!(
                        "field '{}' cannot be coerced to {}",
                        field.name,
                        field.kind.name()
                    ))
                })?;
                out.insert(field.name.clone(), coerced);
            }
        }
    }
    Ok(out)
}

fn coerce_value(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .map(|n| json!(n))
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|n| json!(n)))
            }
            _ => None,
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(json!(true)),
                "false" => Some(json!(false)),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(json!(false)),
                Some(1) => Some(json!(true)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Date => match value {
            Value::String(s) => normalize_date(s).map(Value::String),
            _ => None,
        },
        FieldKind::Text => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(json!(n.to_string())),
            Value::Bool(b) => Some(json!(b.to_string())),
            _ => None,
        },
    }
}

/// Normalize `YYYY-MM-DD[ HH:MM:SS]` (also `/`-separated, unpadded) to
/// ISO-8601. Anything else is rejected.
fn normalize_date(text: &str) -> Option<String> {
    let text = text.trim();
    let (date_part, time_part) = match text.split_once(|c| c == ' ' || c == 'T') {
        Some((d, t)) => (d, Some(t)),
        None => (text, None),
    };

    let mut pieces = date_part.split(|c| c == '-' || c == '/');
    let year: u32 = pieces.next()?.parse().ok()?;
    let month: u32 = pieces.next()?.parse().ok()?;
    let day: u32 = pieces.next()?.parse().ok()?;
    if pieces.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let mut out = format!("{year:04}-{month:02}-{day:02}");
    if let Some(time) = time_part {
        let mut clock = time.trim_end_matches('Z').split(':');
        let hour: u32 = clock.next()?.parse().ok()?;
        let minute: u32 = clock.next()?.parse().ok()?;
        let second: u32 = match clock.next() {
            Some(s) => s.parse().ok()?,
            None => 0,
        };
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        out.push_str(&format!("T{hour:02}:{minute:02}:{second:02}"));
    }
    Some(out)
}
