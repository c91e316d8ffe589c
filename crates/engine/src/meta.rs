//! Managers for the remaining system tables.
//!
//! `_views`, `_schemas`, `_triggers` and `_procedures` all follow one
//! pattern: an in-memory cache warmed from the table at open, with every
//! mutation applied to both the cache and the chain. The tables themselves
//! are created lazily on first write.

use crate::catalog::{Catalog, PROCEDURE_TABLE, SCHEMA_TABLE, TRIGGER_TABLE, VIEW_TABLE};
use crate::chain;
use common::{DbError, DbResult, Row};
use hashbrown::HashMap;
use pager::Pager;
use parser::{SchemaField, SelectCommand, TriggerEvent, TriggerTiming};
use serde_json::{json, Value};

/// Load every row of a system table, if it exists yet.
fn load_rows(pager: &mut Pager, catalog: &Catalog, table: &str) -> DbResult<Vec<Row>> {
    let Some(entry) = catalog.get(table) else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for (_, decoded) in chain::scan_chain(pager, entry.start_page)? {
        rows.extend(decoded.rows.iter().cloned());
    }
    Ok(rows)
}

/// Append one row, creating the table on first use.
fn append_row(pager: &mut Pager, catalog: &mut Catalog, table: &str, row: &Row) -> DbResult<()> {
    let mut entry = catalog.ensure_system_table(pager, table)?;
    let before = entry.last_page;
    chain::append_row(pager, &mut entry, row)?;
    if entry.last_page != before {
        catalog.set_last_page(pager, table, entry.last_page)?;
    }
    Ok(())
}

/// Drop every row matching `key_field == key`. Returns how many went away.
fn remove_rows(
    pager: &mut Pager,
    catalog: &Catalog,
    table: &str,
    key_field: &str,
    key: &str,
) -> DbResult<usize> {
    let Some(entry) = catalog.get(table) else {
        return Ok(0);
    };
    let mut removed = 0;
    for (page_id, decoded) in chain::scan_chain(pager, entry.start_page)? {
        let kept: Vec<Row> = decoded
            .rows
            .iter()
            .filter(|r| r.get(key_field).and_then(Value::as_str) != Some(key))
            .cloned()
            .collect();
        if kept.len() != decoded.rows.len() {
            removed += decoded.rows.len() - kept.len();
            chain::rewrite_page(pager, page_id, &kept)?;
        }
    }
    Ok(removed)
}

/// Views: name -> stored SELECT command.
#[derive(Debug, Default)]
pub struct ViewManager {
    views: HashMap<String, SelectCommand>,
}

impl ViewManager {
    pub fn load(pager: &mut Pager, catalog: &Catalog) -> DbResult<Self> {
        let mut views = HashMap::new();
        for row in load_rows(pager, catalog, VIEW_TABLE)? {
            let name = row.get("name").and_then(Value::as_str);
            let query = row.get("query");
            if let (Some(name), Some(query)) = (name, query) {
                let select: SelectCommand = serde_json::from_value(query.clone())
                    .map_err(|e| DbError::Storage(format!("corrupt view '{name}': {e}")))?;
                views.insert(name.to_string(), select);
            }
        }
        Ok(Self { views })
    }

    pub fn get(&self, name: &str) -> Option<&SelectCommand> {
        self.views.get(name)
    }

    pub fn create(
        &mut self,
        pager: &mut Pager,
        catalog: &mut Catalog,
        name: &str,
        query: SelectCommand,
    ) -> DbResult<()> {
        if self.views.contains_key(name) {
            return Err(DbError::AlreadyExists(format!("view '{name}' already exists")));
        }
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        row.insert(
            "query".into(),
            serde_json::to_value(&query)
                .map_err(|e| DbError::Storage(format!("failed to serialize view: {e}")))?,
        );
        append_row(pager, catalog, VIEW_TABLE, &row)?;
        self.views.insert(name.to_string(), query);
        Ok(())
    }

    pub fn drop(&mut self, pager: &mut Pager, catalog: &Catalog, name: &str) -> DbResult<()> {
        if self.views.remove(name).is_none() {
            return Err(DbError::NotFound(format!("view '{name}' does not exist")));
        }
        remove_rows(pager, catalog, VIEW_TABLE, "name", name)?;
        Ok(())
    }
}

/// Schemas: table -> declared fields, enforced at insert/update time.
#[derive(Debug, Default)]
pub struct SchemaManager {
    schemas: HashMap<String, Vec<SchemaField>>,
}

impl SchemaManager {
    pub fn load(pager: &mut Pager, catalog: &Catalog) -> DbResult<Self> {
        let mut schemas = HashMap::new();
        for row in load_rows(pager, catalog, SCHEMA_TABLE)? {
            let table = row.get("table").and_then(Value::as_str);
            let fields = row.get("fields");
            if let (Some(table), Some(fields)) = (table, fields) {
                let fields: Vec<SchemaField> = serde_json::from_value(fields.clone())
                    .map_err(|e| DbError::Storage(format!("corrupt schema for '{table}': {e}")))?;
                schemas.insert(table.to_string(), fields);
            }
        }
        Ok(Self { schemas })
    }

    pub fn get(&self, table: &str) -> Option<&[SchemaField]> {
        self.schemas.get(table).map(Vec::as_slice)
    }

    /// Define or redefine the schema for a table.
    pub fn define(
        &mut self,
        pager: &mut Pager,
        catalog: &mut Catalog,
        table: &str,
        fields: Vec<SchemaField>,
    ) -> DbResult<()> {
        remove_rows(pager, catalog, SCHEMA_TABLE, "table", table)?;
        let mut row = Row::new();
        row.insert("table".into(), json!(table));
        row.insert(
            "fields".into(),
            serde_json::to_value(&fields)
                .map_err(|e| DbError::Storage(format!("failed to serialize schema: {e}")))?,
        );
        append_row(pager, catalog, SCHEMA_TABLE, &row)?;
        self.schemas.insert(table.to_string(), fields);
        Ok(())
    }

    pub fn drop_for_table(&mut self, pager: &mut Pager, catalog: &Catalog, table: &str) -> DbResult<()> {
        self.schemas.remove(table);
        remove_rows(pager, catalog, SCHEMA_TABLE, "table", table)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TriggerDef {
    pub name: String,
    pub table: String,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub statement: String,
}

/// Triggers: fired synchronously around insert/update/delete.
#[derive(Debug, Default)]
pub struct TriggerManager {
    triggers: Vec<TriggerDef>,
}

impl TriggerManager {
    pub fn load(pager: &mut Pager, catalog: &Catalog) -> DbResult<Self> {
        let mut triggers = Vec::new();
        for row in load_rows(pager, catalog, TRIGGER_TABLE)? {
            triggers.push(trigger_from_row(&row)?);
        }
        Ok(Self { triggers })
    }

    pub fn matching(
        &self,
        table: &str,
        timing: TriggerTiming,
        event: TriggerEvent,
    ) -> Vec<String> {
        self.triggers
            .iter()
            .filter(|t| t.table == table && t.timing == timing && t.event == event)
            .map(|t| t.statement.clone())
            .collect()
    }

    pub fn create(
        &mut self,
        pager: &mut Pager,
        catalog: &mut Catalog,
        def: TriggerDef,
    ) -> DbResult<()> {
        if self.triggers.iter().any(|t| t.name == def.name) {
            return Err(DbError::AlreadyExists(format!(
                "trigger '{}' already exists",
                def.name
            )));
        }
        let mut row = Row::new();
        row.insert("name".into(), json!(def.name));
        row.insert("table".into(), json!(def.table));
        row.insert(
            "timing".into(),
            json!(match def.timing {
                TriggerTiming::Before => "before",
                TriggerTiming::After => "after",
            }),
        );
        row.insert(
            "event".into(),
            json!(match def.event {
                TriggerEvent::Insert => "insert",
                TriggerEvent::Update => "update",
                TriggerEvent::Delete => "delete",
            }),
        );
        row.insert("statement".into(), json!(def.statement));
        append_row(pager, catalog, TRIGGER_TABLE, &row)?;
        self.triggers.push(def);
        Ok(())
    }

    pub fn drop(&mut self, pager: &mut Pager, catalog: &Catalog, name: &str) -> DbResult<()> {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.name != name);
        if self.triggers.len() == before {
            return Err(DbError::NotFound(format!("trigger '{name}' does not exist")));
        }
        remove_rows(pager, catalog, TRIGGER_TABLE, "name", name)?;
        Ok(())
    }
}

fn trigger_from_row(row: &Row) -> DbResult<TriggerDef> {
    let field = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbError::Storage(format!("trigger record missing '{key}'")))
    };
    let timing = match field("timing")?.as_str() {
        "before" => TriggerTiming::Before,
        "after" => TriggerTiming::After,
        other => return Err(DbError::Storage(format!("unknown trigger timing '{other}'"))),
    };
    let event = match field("event")?.as_str() {
        "insert" => TriggerEvent::Insert,
        "update" => TriggerEvent::Update,
        "delete" => TriggerEvent::Delete,
        other => return Err(DbError::Storage(format!("unknown trigger event '{other}'"))),
    };
    Ok(TriggerDef {
        name: field("name")?,
        table: field("table")?,
        timing,
        event,
        statement: field("statement")?,
    })
}

/// Procedures: name -> stored statement list.
#[derive(Debug, Default)]
pub struct ProcedureManager {
    procedures: HashMap<String, Vec<String>>,
}

impl ProcedureManager {
    pub fn load(pager: &mut Pager, catalog: &Catalog) -> DbResult<Self> {
        let mut procedures = HashMap::new();
        for row in load_rows(pager, catalog, PROCEDURE_TABLE)? {
            let name = row.get("name").and_then(Value::as_str);
            let statements = row.get("statements").and_then(Value::as_array);
            if let (Some(name), Some(statements)) = (name, statements) {
                let statements: Vec<String> = statements
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                procedures.insert(name.to_string(), statements);
            }
        }
        Ok(Self { procedures })
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.procedures.get(name).map(Vec::as_slice)
    }

    pub fn create(
        &mut self,
        pager: &mut Pager,
        catalog: &mut Catalog,
        name: &str,
        statements: Vec<String>,
    ) -> DbResult<()> {
        if self.procedures.contains_key(name) {
            return Err(DbError::AlreadyExists(format!(
                "procedure '{name}' already exists"
            )));
        }
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        row.insert("statements".into(), json!(statements));
        append_row(pager, catalog, PROCEDURE_TABLE, &row)?;
        self.procedures.insert(name.to_string(), statements);
        Ok(())
    }
}
