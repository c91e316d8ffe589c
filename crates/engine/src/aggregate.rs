//! Aggregate execution: COUNT, SUM, AVG, MIN, MAX, with GROUP BY / HAVING.

use crate::db::{Database, QueryOutput};
use crate::filter::{self, compare, get_field};
use common::value::value_total_cmp;
use common::{DbError, DbResult, Row};
use parser::{AggFunc, AggregateCommand};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Single-pass accumulator shared by every function.
#[derive(Debug, Default)]
struct Accumulator {
    rows: u64,
    present: u64,
    sum: f64,
    numeric: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn feed(&mut self, value: Option<&Value>) -> DbResult<()> {
        self.rows += 1;
        let value = match value {
            Some(Value::Null) | None => return Ok(()),
            Some(v) => v,
        };
        self.present += 1;

        if let Value::Number(n) = value {
            let n = n
                .as_f64()
                .ok_or_else(|| DbError::Constraint("non-finite number in aggregate".into()))?;
            self.sum += n;
            self.numeric += 1;
        }

        let replace_min = match &self.min {
            Some(current) => value_total_cmp(value, current) == Ordering::Less,
            None => true,
        };
        if replace_min {
            self.min = Some(value.clone());
        }
        let replace_max = match &self.max {
            Some(current) => value_total_cmp(value, current) == Ordering::Greater,
            None => true,
        };
        if replace_max {
            self.max = Some(value.clone());
        }
        Ok(())
    }

    /// Final value for `func`; AVG over an empty input is null.
    fn finish(&self, func: AggFunc, field: Option<&str>) -> DbResult<Value> {
        Ok(match func {
            AggFunc::Count => {
                if field.is_some() {
                    json!(self.present)
                } else {
                    json!(self.rows)
                }
            }
            AggFunc::Sum => {
                if self.present > self.numeric {
                    return Err(DbError::Constraint("SUM over non-numeric values".into()));
                }
                json!(self.sum)
            }
            AggFunc::Avg => {
                if self.present > self.numeric {
                    return Err(DbError::Constraint("AVG over non-numeric values".into()));
                }
                if self.numeric == 0 {
                    Value::Null
                } else {
                    json!(self.sum / self.numeric as f64)
                }
            }
            AggFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggFunc::Max => self.max.clone().unwrap_or(Value::Null),
        })
    }
}

impl Database {
    pub(crate) fn exec_aggregate(&mut self, agg: &AggregateCommand) -> DbResult<QueryOutput> {
        let rows = self.aggregate_input(agg)?;
        let field = agg.field.as_deref();

        match &agg.group_by {
            None => {
                let mut acc = Accumulator::default();
                for row in &rows {
                    acc.feed(field.and_then(|f| get_field(row, f)))?;
                }
                let value = acc.finish(agg.func, field)?;
                Ok(QueryOutput::Value(value))
            }
            Some(group_field) => {
                // BTreeMap keys give the groups a stable output order.
                let mut groups: BTreeMap<String, (Value, Accumulator)> = BTreeMap::new();
                for row in &rows {
                    let group_value = get_field(row, group_field).cloned().unwrap_or(Value::Null);
                    let key = group_value.to_string();
                    let entry = groups
                        .entry(key)
                        .or_insert_with(|| (group_value, Accumulator::default()));
                    entry.1.feed(field.and_then(|f| get_field(row, f)))?;
                }

                let result_label = format!(
                    "{}({})",
                    agg.func.name(),
                    agg.field.as_deref().unwrap_or("*")
                );
                let mut out = Vec::new();
                for (_, (group_value, acc)) in groups {
                    let value = acc.finish(agg.func, field)?;
                    if let Some((op, expected)) = &agg.having {
                        if !compare(&value, *op, expected) {
                            continue;
                        }
                    }
                    let mut row = Row::new();
                    row.insert(group_field.clone(), group_value);
                    row.insert(result_label.clone(), value);
                    out.push(row);
                }
                Ok(QueryOutput::Rows(out))
            }
        }
    }

    /// Filtered input rows; a view substitutes its stored SELECT first.
    fn aggregate_input(&mut self, agg: &AggregateCommand) -> DbResult<Vec<Row>> {
        if let Some(view) = self.views.get(&agg.table).cloned() {
            let mut rows = self.exec_select(&view)?;
            if let Some(criteria) = &agg.criteria {
                let compiled = filter::compile(criteria)?;
                rows.retain(|row| filter::eval(&compiled, row));
            }
            return Ok(rows);
        }
        let entry = self.catalog.require(&agg.table)?;
        let matches = self.collect_matching(&entry, agg.criteria.as_ref())?;
        Ok(matches.into_iter().map(|(row, _)| row).collect())
    }
}
