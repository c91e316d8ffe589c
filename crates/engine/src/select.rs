//! SELECT execution.
//!
//! The pipeline is fixed: resolve the base table (substituting views), apply
//! joins, filter, DISTINCT on the projected image, stable sort, offset then
//! limit, and finally projection. Rows coming straight from a table keep
//! their page-id hints; anything that went through a join or a view does
//! not.

use crate::db::Database;
use crate::filter::{self, get_field};
use common::value::value_total_cmp;
use common::{DbError, DbResult, Row};
use hashbrown::{HashMap, HashSet};
use parser::{CompareOp, JoinClause, JoinKind, SelectCommand, SelectItem, SortDirection};
use serde_json::Value;

impl Database {
    pub(crate) fn exec_select(&mut self, select: &SelectCommand) -> DbResult<Vec<Row>> {
        // 1. Base rows; a view substitutes its stored SELECT.
        let mut rows = self.base_rows(select)?;

        // 2. Joins.
        if !select.joins.is_empty() {
            rows = rows.into_iter().map(|r| qualify(&select.table, r)).collect();
            for join in &select.joins {
                let right = self.join_side_rows(&join.table)?;
                rows = apply_join(rows, right, join)?;
            }
            // 3. WHERE over the joined stream.
            if let Some(criteria) = &select.criteria {
                let compiled = filter::compile(criteria)?;
                rows.retain(|row| filter::eval(&compiled, row));
            }
        }

        // 5. DISTINCT keys off the projected image, before sorting.
        if select.distinct {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(canonical(&project(row, &select.items))));
        }

        // 6. Stable sort.
        if let Some(order) = &select.order_by {
            rows.sort_by(|a, b| {
                let left = get_field(a, &order.field).cloned().unwrap_or(Value::Null);
                let right = get_field(b, &order.field).cloned().unwrap_or(Value::Null);
                let ord = value_total_cmp(&left, &right);
                match order.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        // 7. Offset before limit.
        let offset = select.offset.unwrap_or(0) as usize;
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(select.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();

        // 8. Projection.
        Ok(rows.iter().map(|row| project(row, &select.items)).collect())
    }

    /// Base-table rows with WHERE already applied when there are no joins
    /// (steps 3 and 4: single pass, index fast path for one equality).
    fn base_rows(&mut self, select: &SelectCommand) -> DbResult<Vec<Row>> {
        if let Some(view) = self.views.get(&select.table).cloned() {
            let mut rows = self.exec_select(&view)?;
            if select.joins.is_empty() {
                if let Some(criteria) = &select.criteria {
                    let compiled = filter::compile(criteria)?;
                    rows.retain(|row| filter::eval(&compiled, row));
                }
            }
            return Ok(rows);
        }

        let entry = self.catalog.require(&select.table)?;
        if select.joins.is_empty() {
            let matches = self.collect_matching(&entry, select.criteria.as_ref())?;
            Ok(matches.into_iter().map(|(row, _)| row).collect())
        } else {
            let all = self.scan_filtered(entry.start_page, None)?;
            Ok(all.into_iter().map(|(row, _)| row).collect())
        }
    }

    /// A join side may itself be a view.
    fn join_side_rows(&mut self, table: &str) -> DbResult<Vec<Row>> {
        if let Some(view) = self.views.get(table).cloned() {
            return self.exec_select(&view);
        }
        let entry = self.catalog.require(table)?;
        let rows = self.scan_filtered(entry.start_page, None)?;
        Ok(rows.into_iter().map(|(row, _)| row).collect())
    }
}

/// Prefix every unqualified key with the table name.
fn qualify(table: &str, row: Row) -> Row {
    let mut out = Row::new();
    for (key, value) in row {
        if key.contains('.') {
            out.insert(key, value);
        } else {
            out.insert(format!("{table}.{key}"), value);
        }
    }
    out
}

/// Union of keys across a side, for NULL-filling unmatched outer rows.
fn field_universe(rows: &[Row]) -> Vec<String> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

fn merge(left: &Row, right: &Row) -> Row {
    let mut out = left.clone();
    for (key, value) in right {
        out.insert(key.clone(), value.clone());
    }
    out
}

fn null_filled(fields: &[String]) -> Row {
    let mut row = Row::new();
    for field in fields {
        row.insert(field.clone(), Value::Null);
    }
    row
}

/// One join step: hash join for equality conditions, nested loops otherwise,
/// NULL-filled rows for the unmatched sides of outer joins.
fn apply_join(left: Vec<Row>, right: Vec<Row>, join: &JoinClause) -> DbResult<Vec<Row>> {
    let right: Vec<Row> = right.into_iter().map(|r| qualify(&join.table, r)).collect();

    if join.kind == JoinKind::Cross {
        let mut out = Vec::with_capacity(left.len() * right.len());
        for l in &left {
            for r in &right {
                out.push(merge(l, r));
            }
        }
        return Ok(out);
    }

    let cond = join
        .on
        .as_ref()
        .ok_or_else(|| DbError::Parse(format!("join on '{}' requires ON", join.table)))?;

    let left_fields = field_universe(&left);
    let right_fields = field_universe(&right);

    let mut out = Vec::new();
    let mut left_matched = vec![false; left.len()];
    let mut right_matched = vec![false; right.len()];

    if cond.op == CompareOp::Eq {
        // Hash join: build over the smaller side, probe from the other.
        if left.len() <= right.len() {
            let table = build_hash_side(&left, &cond.left);
            for (ri, r) in right.iter().enumerate() {
                let hits = get_field(r, &cond.right)
                    .filter(|v| !v.is_null())
                    .and_then(|v| table.get(&canonical_value(v)));
                if let Some(hits) = hits {
                    right_matched[ri] = true;
                    for &li in hits {
                        left_matched[li] = true;
                        out.push(merge(&left[li], r));
                    }
                }
            }
        } else {
            let table = build_hash_side(&right, &cond.right);
            for (li, l) in left.iter().enumerate() {
                let hits = get_field(l, &cond.left)
                    .filter(|v| !v.is_null())
                    .and_then(|v| table.get(&canonical_value(v)));
                if let Some(hits) = hits {
                    left_matched[li] = true;
                    for &ri in hits {
                        right_matched[ri] = true;
                        out.push(merge(l, &right[ri]));
                    }
                }
            }
        }
    } else {
        // Nested loops for non-equality conditions.
        for (li, l) in left.iter().enumerate() {
            for (ri, r) in right.iter().enumerate() {
                let merged = merge(l, r);
                let hit = match (get_field(&merged, &cond.left), get_field(&merged, &cond.right)) {
                    (Some(a), Some(b)) => filter::compare(a, cond.op, b),
                    _ => false,
                };
                if hit {
                    left_matched[li] = true;
                    right_matched[ri] = true;
                    out.push(merged);
                }
            }
        }
    }

    append_outer_rows(
        &mut out,
        join.kind,
        &left,
        &left_matched,
        &right,
        &right_matched,
        &left_fields,
        &right_fields,
    );
    Ok(out)
}

/// Key a side's rows by the canonical image of the join column.
fn build_hash_side(rows: &[Row], key: &str) -> HashMap<String, Vec<usize>> {
    let mut table: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        if let Some(value) = get_field(row, key) {
            if !value.is_null() {
                table.entry(canonical_value(value)).or_default().push(idx);
            }
        }
    }
    table
}

#[allow(clippy::too_many_arguments)]
fn append_outer_rows(
    out: &mut Vec<Row>,
    kind: JoinKind,
    left: &[Row],
    left_matched: &[bool],
    right: &[Row],
    right_matched: &[bool],
    left_fields: &[String],
    right_fields: &[String],
) {
    if matches!(kind, JoinKind::Left | JoinKind::Full) {
        let filler = null_filled(right_fields);
        for (idx, row) in left.iter().enumerate() {
            if !left_matched[idx] {
                out.push(merge(row, &filler));
            }
        }
    }
    if matches!(kind, JoinKind::Right | JoinKind::Full) {
        let filler = null_filled(left_fields);
        for (idx, row) in right.iter().enumerate() {
            if !right_matched[idx] {
                out.push(merge(&filler, row));
            }
        }
    }
}

/// Project one row through the select items; `*` passes the row through.
pub(crate) fn project(row: &Row, items: &[SelectItem]) -> Row {
    let mut out = Row::new();
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for (key, value) in row {
                    out.insert(key.clone(), value.clone());
                }
            }
            SelectItem::Column(name) => {
                let value = get_field(row, name).cloned().unwrap_or(Value::Null);
                out.insert(name.clone(), value);
            }
        }
    }
    out
}

/// Canonical text image of a projected row, for DISTINCT sets.
pub(crate) fn canonical(row: &Row) -> String {
    serde_json::to_string(row).unwrap_or_default()
}

/// Canonical text image of a join key value.
fn canonical_value(value: &Value) -> String {
    match value {
        // Numbers hash by their f64 image so 1 and 1.0 join.
        Value::Number(n) => format!("n:{}", n.as_f64().unwrap_or(f64::NAN)),
        other => other.to_string(),
    }
}
