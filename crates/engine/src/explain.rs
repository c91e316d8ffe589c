//! EXPLAIN: describe the plan a statement would execute, touching nothing
//! but the catalog.

use crate::db::Database;
use common::DbResult;
use parser::{Command, CompareOp, Criteria, JoinKind, SelectItem};
use serde_json::{json, Value};

impl Database {
    pub(crate) fn exec_explain(&mut self, command: &Command) -> DbResult<Value> {
        Ok(match command {
            Command::Select(select) => {
                let mut steps = Vec::new();

                if self.views.get(&select.table).is_some() {
                    steps.push(json!({"step": "VIEW", "view": select.table}));
                    steps.push(json!({"step": "SCAN", "table": select.table}));
                } else if select.joins.is_empty() {
                    steps.push(self.scan_step(&select.table, select.criteria.as_ref()));
                } else {
                    steps.push(json!({"step": "SCAN", "table": select.table}));
                }

                for join in &select.joins {
                    let method = match (&join.kind, &join.on) {
                        (JoinKind::Cross, _) => "nested-loop",
                        (_, Some(on)) if on.op == CompareOp::Eq => "hash",
                        _ => "nested-loop",
                    };
                    steps.push(json!({
                        "step": "JOIN",
                        "kind": join_kind_name(join.kind),
                        "table": join.table,
                        "method": method,
                    }));
                }

                if select.criteria.is_some() && !select.joins.is_empty() {
                    steps.push(json!({"step": "FILTER"}));
                }
                if select.distinct {
                    steps.push(json!({"step": "DISTINCT"}));
                }
                if let Some(order) = &select.order_by {
                    steps.push(json!({
                        "step": "SORT",
                        "field": order.field,
                        "direction": match order.direction {
                            parser::SortDirection::Asc => "asc",
                            parser::SortDirection::Desc => "desc",
                        },
                    }));
                }
                if let Some(offset) = select.offset {
                    steps.push(json!({"step": "OFFSET", "rows": offset}));
                }
                if let Some(limit) = select.limit {
                    steps.push(json!({"step": "LIMIT", "rows": limit}));
                }
                steps.push(json!({
                    "step": "PROJECT",
                    "fields": select
                        .items
                        .iter()
                        .map(|item| match item {
                            SelectItem::Wildcard => "*".to_string(),
                            SelectItem::Column(name) => name.clone(),
                        })
                        .collect::<Vec<_>>(),
                }));

                json!({"operation": "SELECT", "table": select.table, "steps": steps})
            }
            Command::Aggregate(agg) => {
                let mut steps = vec![self.scan_step(&agg.table, agg.criteria.as_ref())];
                steps.push(json!({
                    "step": "AGGREGATE",
                    "function": agg.func.name(),
                    "field": agg.field.clone().unwrap_or_else(|| "*".into()),
                    "groupBy": agg.group_by,
                }));
                if agg.having.is_some() {
                    steps.push(json!({"step": "HAVING"}));
                }
                json!({"operation": "AGGREGATE", "table": agg.table, "steps": steps})
            }
            Command::Insert { table, rows } => json!({
                "operation": "INSERT",
                "table": table,
                "rows": rows.len(),
                "steps": [{"step": "APPEND", "table": table}],
            }),
            Command::Update { table, criteria, .. } => json!({
                "operation": "UPDATE",
                "table": table,
                "steps": [self.scan_step(table, criteria.as_ref()), json!({"step": "REWRITE"})],
            }),
            Command::Delete { table, criteria } => json!({
                "operation": "DELETE",
                "table": table,
                "steps": [self.scan_step(table, criteria.as_ref()), json!({"step": "COMPACT"})],
            }),
            Command::Explain(inner) => self.exec_explain(inner)?,
            other => json!({"operation": format!("{other:?}")
                .split(|c: char| !c.is_ascii_alphanumeric())
                .next()
                .unwrap_or("STATEMENT")
                .to_uppercase()}),
        })
    }

    /// SCAN or INDEX SCAN, by the same rule the executors use.
    fn scan_step(&self, table: &str, criteria: Option<&Criteria>) -> Value {
        match self.index_fast_path(table, criteria) {
            Some((field, _)) => json!({"step": "INDEX SCAN", "table": table, "field": field}),
            None => json!({"step": "SCAN", "table": table}),
        }
    }
}

fn join_kind_name(kind: JoinKind) -> &'static str {
    match kind {
        JoinKind::Inner => "inner",
        JoinKind::Left => "left",
        JoinKind::Right => "right",
        JoinKind::Full => "full",
        JoinKind::Cross => "cross",
    }
}
