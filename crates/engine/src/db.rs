//! The per-file database handle.
//!
//! One `Database` owns exactly one `.sawit` file plus its WAL and audit
//! companions: the pager, the self-hosted catalog, the in-memory indexes,
//! and the system-table managers. Statement execution is synchronous and
//! single-threaded; the worker that owns the file is the only caller.

use crate::catalog::{is_system_name, Catalog, TableEntry};
use crate::chain;
use crate::filter::{self, CompiledCriteria};
use crate::indexes::IndexManager;
use crate::meta::{ProcedureManager, SchemaManager, TriggerDef, TriggerManager, ViewManager};
use crate::observer::{AuditLog, ChangeObserver};
use crate::txn::{is_bufferable, TransactionBuffer};
use common::{DbError, DbResult, PageId, Row, WalConfig};
use hashbrown::HashMap;
use pager::{Pager, PagerOptions};
use parser::{Command, Criteria, TriggerEvent, TriggerTiming};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use wal::Wal;

/// Session id used for internally fired statements (triggers, procedures).
const INTERNAL_SESSION: u64 = u64::MAX;

/// Nested EXEC depth cap; a procedure calling itself stops here.
const MAX_EXEC_DEPTH: u8 = 8;

/// The executor's native result: rows, a status message, an aggregate value,
/// or an EXPLAIN plan object.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Message(String),
    Value(Value),
    Plan(Value),
}

/// Open-time knobs; the server fills these from its `Config`.
#[derive(Clone, Debug)]
pub struct DatabaseOptions {
    pub wal: WalConfig,
    pub buffer_pages: usize,
    pub object_pages: usize,
    /// Append mutations to `<name>.audit` as JSON lines.
    pub audit: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            wal: WalConfig::default(),
            buffer_pages: 256,
            object_pages: 64,
            audit: false,
        }
    }
}

pub struct Database {
    pub(crate) name: String,
    path: PathBuf,
    options: DatabaseOptions,
    pub(crate) pager: Pager,
    pub(crate) catalog: Catalog,
    pub(crate) indexes: IndexManager,
    pub(crate) views: ViewManager,
    pub(crate) schemas: SchemaManager,
    triggers: TriggerManager,
    procedures: ProcedureManager,
    observers: Vec<Box<dyn ChangeObserver>>,
    txns: HashMap<u64, TransactionBuffer>,
    in_trigger: bool,
    exec_depth: u8,
}

impl Database {
    /// Open (or create) the database file, replaying the WAL first.
    pub fn open(path: impl AsRef<Path>, options: DatabaseOptions) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("db")
            .to_string();

        let (pager, catalog) = open_storage(&path, &options)?;
        let mut db = Self {
            name: name.clone(),
            path: path.clone(),
            options,
            pager,
            catalog,
            indexes: IndexManager::default(),
            views: ViewManager::default(),
            schemas: SchemaManager::default(),
            triggers: TriggerManager::default(),
            procedures: ProcedureManager::default(),
            observers: Vec::new(),
            txns: HashMap::new(),
            in_trigger: false,
            exec_depth: 0,
        };
        db.load_managers()?;

        if db.options.audit {
            let audit = AuditLog::open(&path.with_extension("audit"))?;
            db.observers.push(Box::new(audit));
        }
        info!(db = %name, "database open");
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_observer(&mut self, observer: Box<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    /// Flush, checkpoint, and release the file handles.
    pub fn close(self) -> DbResult<()> {
        self.pager.close()
    }

    /// Session cleanup when a connection goes away.
    pub fn end_session(&mut self, session: u64) {
        self.txns.remove(&session);
    }

    /// Parse and execute one statement for `session`.
    pub fn execute_text(
        &mut self,
        text: &str,
        params: Option<&std::collections::HashMap<String, Value>>,
        session: u64,
    ) -> DbResult<QueryOutput> {
        let command = parser::parse(text, params)?;
        self.execute_command(command, session)
    }

    /// Execute an already-parsed command for `session`.
    pub fn execute_command(&mut self, command: Command, session: u64) -> DbResult<QueryOutput> {
        match &command {
            Command::Begin => {
                if self.txns.contains_key(&session) {
                    return Err(DbError::Constraint("transaction already active".into()));
                }
                self.txns.insert(session, TransactionBuffer::new());
                return Ok(QueryOutput::Message("transaction started".into()));
            }
            Command::Commit => return self.commit_transaction(session),
            Command::Rollback => {
                return match self.txns.remove(&session) {
                    Some(_) => Ok(QueryOutput::Message("transaction rolled back".into())),
                    None => Err(DbError::Constraint("no active transaction".into())),
                };
            }
            _ => {}
        }

        if is_bufferable(&command) {
            if let Some(txn) = self.txns.get_mut(&session) {
                txn.buffer(command);
                return Ok(QueryOutput::Message("buffered in transaction".into()));
            }
        }

        self.dispatch(command, session)
    }

    fn commit_transaction(&mut self, session: u64) -> DbResult<QueryOutput> {
        let txn = self
            .txns
            .remove(&session)
            .ok_or_else(|| DbError::Constraint("no active transaction".into()))?;
        let count = txn.len();
        for op in txn.into_ops() {
            // Replay through the live executors; the first failure aborts
            // the rest, which is the rollback.
            self.dispatch(op, session)?;
        }
        Ok(QueryOutput::Message(format!(
            "transaction committed ({count} operation(s))"
        )))
    }

    fn dispatch(&mut self, command: Command, session: u64) -> DbResult<QueryOutput> {
        match command {
            Command::CreateTable { table } => self.exec_create_table(&table),
            Command::ShowTables => self.exec_show_tables(),
            Command::ShowIndexes => self.exec_show_indexes(),
            Command::ShowStats => self.exec_show_stats(),
            Command::Insert { table, rows } => self.exec_insert(&table, rows),
            Command::Select(select) => self.exec_select(&select).map(QueryOutput::Rows),
            Command::Delete { table, criteria } => self.exec_delete(&table, criteria.as_ref()),
            Command::Update { table, assignments, criteria } => {
                self.exec_update(&table, &assignments, criteria.as_ref())
            }
            Command::DropTable { table } => self.exec_drop_table(&table),
            Command::CreateIndex { table, field } => self.exec_create_index(&table, &field),
            Command::Aggregate(agg) => self.exec_aggregate(&agg),
            Command::Explain(inner) => self.exec_explain(&inner).map(QueryOutput::Plan),
            Command::CreateView { name, query } => self.exec_create_view(&name, query),
            Command::DropView { name } => self.exec_drop_view(&name),
            Command::DefineSchema { table, fields } => self.exec_define_schema(&table, fields),
            Command::CreateTrigger { name, table, timing, event, statement } => self
                .exec_create_trigger(TriggerDef {
                    name,
                    table,
                    timing,
                    event,
                    statement,
                }),
            Command::DropTrigger { name } => self.exec_drop_trigger(&name),
            Command::CreateProcedure { name, statements } => {
                self.exec_create_procedure(&name, statements)
            }
            Command::ExecuteProcedure { name } => self.exec_procedure(&name, session),
            Command::Backup { path } => self.exec_backup(&path),
            Command::Restore { path } => self.exec_restore(&path),
            Command::Empty => Ok(QueryOutput::Message(String::new())),
            Command::Begin | Command::Commit | Command::Rollback => {
                unreachable!("transaction control handled before dispatch")
            }
        }
    }

    // DDL and maintenance.

    fn exec_create_table(&mut self, table: &str) -> DbResult<QueryOutput> {
        reject_system_target(table)?;
        self.catalog.create_table(&mut self.pager, table, false)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("table '{table}' created")))
    }

    fn exec_drop_table(&mut self, table: &str) -> DbResult<QueryOutput> {
        reject_system_target(table)?;
        self.catalog.drop_table(&mut self.pager, table)?;
        self.indexes.drop_for_table(&mut self.pager, &self.catalog, table)?;
        self.schemas.drop_for_table(&mut self.pager, &self.catalog, table)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("table '{table}' dropped")))
    }

    fn exec_create_index(&mut self, table: &str, field: &str) -> DbResult<QueryOutput> {
        reject_system_target(table)?;
        self.indexes
            .create(&mut self.pager, &mut self.catalog, table, field)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!(
            "index created on '{table}'({field})"
        )))
    }

    fn exec_show_tables(&mut self) -> DbResult<QueryOutput> {
        let mut rows: Vec<Row> = self.catalog.tables().map(TableEntry::to_row).collect();
        rows.sort_by(|a, b| {
            a.get("name")
                .and_then(Value::as_str)
                .cmp(&b.get("name").and_then(Value::as_str))
        });
        Ok(QueryOutput::Rows(rows))
    }

    fn exec_show_indexes(&mut self) -> DbResult<QueryOutput> {
        let rows = self
            .indexes
            .describe()
            .into_iter()
            .map(|(table, field, stats)| {
                let mut row = Row::new();
                row.insert("table".into(), json!(table));
                row.insert("field".into(), json!(field));
                row.insert("keys".into(), json!(stats.keys));
                row.insert("entries".into(), json!(stats.entries));
                row.insert("depth".into(), json!(stats.depth));
                row
            })
            .collect();
        Ok(QueryOutput::Rows(rows))
    }

    fn exec_show_stats(&mut self) -> DbResult<QueryOutput> {
        let stats = self.pager.stats();
        Ok(QueryOutput::Value(json!({
            "database": self.name,
            "pages": stats.pages,
            "bufferedPages": stats.buffered,
            "cachedObjectPages": stats.objects,
            "dirtyPages": stats.dirty,
            "tables": self.catalog.tables().count(),
            "indexes": self.indexes.describe().len(),
        })))
    }

    fn exec_create_view(&mut self, name: &str, query: parser::SelectCommand) -> DbResult<QueryOutput> {
        reject_system_target(name)?;
        self.views
            .create(&mut self.pager, &mut self.catalog, name, query)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("view '{name}' created")))
    }

    fn exec_drop_view(&mut self, name: &str) -> DbResult<QueryOutput> {
        self.views.drop(&mut self.pager, &self.catalog, name)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("view '{name}' dropped")))
    }

    fn exec_define_schema(
        &mut self,
        table: &str,
        fields: Vec<parser::SchemaField>,
    ) -> DbResult<QueryOutput> {
        reject_system_target(table)?;
        self.catalog.require(table)?;
        self.schemas
            .define(&mut self.pager, &mut self.catalog, table, fields)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("schema defined for '{table}'")))
    }

    fn exec_create_trigger(&mut self, def: TriggerDef) -> DbResult<QueryOutput> {
        reject_system_target(&def.table)?;
        self.catalog.require(&def.table)?;
        let name = def.name.clone();
        self.triggers.create(&mut self.pager, &mut self.catalog, def)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("trigger '{name}' created")))
    }

    fn exec_drop_trigger(&mut self, name: &str) -> DbResult<QueryOutput> {
        self.triggers.drop(&mut self.pager, &self.catalog, name)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("trigger '{name}' dropped")))
    }

    fn exec_create_procedure(
        &mut self,
        name: &str,
        statements: Vec<String>,
    ) -> DbResult<QueryOutput> {
        reject_system_target(name)?;
        self.procedures
            .create(&mut self.pager, &mut self.catalog, name, statements)?;
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("procedure '{name}' created")))
    }

    fn exec_procedure(&mut self, name: &str, session: u64) -> DbResult<QueryOutput> {
        if self.exec_depth >= MAX_EXEC_DEPTH {
            return Err(DbError::Constraint(format!(
                "procedure nesting deeper than {MAX_EXEC_DEPTH}"
            )));
        }
        let statements = self
            .procedures
            .get(name)
            .ok_or_else(|| DbError::NotFound(format!("procedure '{name}' does not exist")))?
            .to_vec();

        self.exec_depth += 1;
        let mut last = QueryOutput::Message(String::new());
        for statement in &statements {
            match self.execute_text(statement, None, session) {
                Ok(output) => last = output,
                Err(e) => {
                    self.exec_depth -= 1;
                    return Err(e);
                }
            }
        }
        self.exec_depth -= 1;
        Ok(last)
    }

    fn exec_backup(&mut self, dest: &str) -> DbResult<QueryOutput> {
        self.pager.checkpoint()?;
        std::fs::copy(&self.path, dest)
            .map_err(|e| DbError::Storage(format!("backup to '{dest}' failed: {e}")))?;
        Ok(QueryOutput::Message(format!("backup written to '{dest}'")))
    }

    fn exec_restore(&mut self, src: &str) -> DbResult<QueryOutput> {
        if !Path::new(src).exists() {
            return Err(DbError::NotFound(format!("backup '{src}' does not exist")));
        }
        // Checkpoint empties the WAL so stale images cannot replay over the
        // restored file, then the storage stack is rebuilt from scratch.
        self.pager.checkpoint()?;
        std::fs::copy(src, &self.path)
            .map_err(|e| DbError::Storage(format!("restore from '{src}' failed: {e}")))?;

        let (pager, catalog) = open_storage(&self.path, &self.options)?;
        self.pager = pager;
        self.catalog = catalog;
        self.load_managers()?;
        self.txns.clear();
        Ok(QueryOutput::Message(format!("restored from '{src}'")))
    }

    fn load_managers(&mut self) -> DbResult<()> {
        self.indexes = IndexManager::load(&mut self.pager, &self.catalog)?;
        self.views = ViewManager::load(&mut self.pager, &self.catalog)?;
        self.schemas = SchemaManager::load(&mut self.pager, &self.catalog)?;
        self.triggers = TriggerManager::load(&mut self.pager, &self.catalog)?;
        self.procedures = ProcedureManager::load(&mut self.pager, &self.catalog)?;
        Ok(())
    }

    // Shared plumbing for the executors (select/dml/aggregate modules).

    pub(crate) fn schema_for(&self, table: &str) -> Option<Vec<parser::SchemaField>> {
        self.schemas.get(table).map(<[parser::SchemaField]>::to_vec)
    }

    /// Whether a single-equality predicate can be served by an index.
    pub(crate) fn index_fast_path<'a>(
        &self,
        table: &str,
        criteria: Option<&'a Criteria>,
    ) -> Option<(&'a str, &'a Value)> {
        match criteria {
            Some(Criteria::Compare {
                field,
                op: parser::CompareOp::Eq,
                value,
            }) if self.indexes.get(table, field).is_some() => Some((field.as_str(), value)),
            _ => None,
        }
    }

    /// Rows of `table` matching `criteria`, each with its page-id hint.
    /// Uses the index fast path for a single equality on an indexed field,
    /// otherwise walks the page chain through the object cache.
    pub(crate) fn collect_matching(
        &mut self,
        entry: &TableEntry,
        criteria: Option<&Criteria>,
    ) -> DbResult<Vec<(Row, PageId)>> {
        let compiled = criteria.map(filter::compile).transpose()?;

        if let Some((field, value)) = self.index_fast_path(&entry.name, criteria) {
            let field = field.to_string();
            let value = value.clone();
            let tree = self.indexes.get(&entry.name, &field).expect("checked");
            let mut pages: Vec<PageId> = tree.find(&value).into_iter().map(|r| r.page).collect();
            pages.sort();
            pages.dedup();

            let mut matches = Vec::new();
            for page_id in pages {
                let decoded = self.pager.read_page_objects(page_id)?;
                for row in &decoded.rows {
                    let hit = row
                        .get(&field)
                        .map(|v| common::value::values_equal(v, &value))
                        .unwrap_or(false);
                    if hit {
                        matches.push((row.clone(), page_id));
                    }
                }
            }
            return Ok(matches);
        }

        self.scan_filtered(entry.start_page, compiled.as_ref())
    }

    /// Chain walk yielding `(row, page)` pairs passing the compiled filter.
    pub(crate) fn scan_filtered(
        &mut self,
        start: PageId,
        compiled: Option<&CompiledCriteria>,
    ) -> DbResult<Vec<(Row, PageId)>> {
        let mut matches = Vec::new();
        for (page_id, decoded) in chain::scan_chain(&mut self.pager, start)? {
            for row in &decoded.rows {
                if compiled.map(|c| filter::eval(c, row)).unwrap_or(true) {
                    matches.push((row.clone(), page_id));
                }
            }
        }
        Ok(matches)
    }

    /// Fire the triggers registered for `table`/`timing`/`event`. Nested
    /// firing is suppressed and failures never abort the outer statement.
    pub(crate) fn fire_triggers(&mut self, table: &str, timing: TriggerTiming, event: TriggerEvent) {
        if self.in_trigger {
            return;
        }
        for statement in self.triggers.matching(table, timing, event) {
            self.in_trigger = true;
            let result = self.execute_text(&statement, None, INTERNAL_SESSION);
            self.in_trigger = false;
            if let Err(e) = result {
                warn!(table, error = %e, "trigger failed");
            }
        }
    }

    pub(crate) fn notify_insert(&mut self, table: &str, row: &Row) {
        for observer in &mut self.observers {
            observer.on_insert(table, row);
        }
    }

    pub(crate) fn notify_update(&mut self, table: &str, old: &Row, new: &Row) {
        for observer in &mut self.observers {
            observer.on_update(table, old, new);
        }
    }

    pub(crate) fn notify_delete(&mut self, table: &str, row: &Row) {
        for observer in &mut self.observers {
            observer.on_delete(table, row);
        }
    }

    /// Row count across every table, for invariant checks in tests.
    pub fn table_row_count(&mut self, table: &str) -> DbResult<u64> {
        let entry = self.catalog.require(table)?;
        chain::count_rows(&mut self.pager, entry.start_page)
    }
}

/// Open the file + WAL pair and load (or bootstrap) the catalog.
fn open_storage(path: &Path, options: &DatabaseOptions) -> DbResult<(Pager, Catalog)> {
    let wal = if options.wal.enabled {
        Some(Wal::open(path.with_extension("wal"), options.wal.sync_mode)?)
    } else {
        None
    };
    let pager_opts = PagerOptions {
        buffer_pages: options.buffer_pages,
        object_pages: options.object_pages,
        checkpoint_interval: options.wal.checkpoint_interval,
    };
    let mut pager = Pager::open(path, wal, pager_opts)?;
    let catalog = if pager.num_pages() == 0 {
        Catalog::bootstrap(&mut pager)?
    } else {
        Catalog::load(&mut pager)?
    };
    Ok((pager, catalog))
}

/// User DDL that targets a reserved `_`-prefixed name fails.
fn reject_system_target(name: &str) -> DbResult<()> {
    if is_system_name(name) {
        return Err(DbError::Constraint(format!(
            "'{name}' is a reserved system name"
        )));
    }
    Ok(())
}
