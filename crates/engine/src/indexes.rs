//! Secondary-index bookkeeping.
//!
//! Indexes are in-memory B-trees keyed by `(table, field)`. The `_indexes`
//! catalog table records which pairs exist; on open each one is rebuilt by a
//! full scan of its table. Every insert/update/delete keeps the trees in
//! lockstep with the stored rows.

use crate::catalog::{Catalog, INDEX_TABLE};
use crate::chain;
use common::{DbError, DbResult, PageId, Row, RowRef};
use hashbrown::HashMap;
use index::BTreeIndex;
use pager::Pager;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<(String, String), BTreeIndex>,
}

impl IndexManager {
    /// Rebuild every index listed in `_indexes` by scanning its table.
    pub fn load(pager: &mut Pager, catalog: &Catalog) -> DbResult<Self> {
        let mut manager = Self::default();
        let Some(meta) = catalog.get(INDEX_TABLE) else {
            return Ok(manager);
        };

        let mut pairs = Vec::new();
        for (_, decoded) in chain::scan_chain(pager, meta.start_page)? {
            for row in &decoded.rows {
                let table = row.get("table").and_then(Value::as_str);
                let field = row.get("field").and_then(Value::as_str);
                if let (Some(table), Some(field)) = (table, field) {
                    pairs.push((table.to_string(), field.to_string()));
                }
            }
        }

        for (table, field) in pairs {
            if let Some(entry) = catalog.get(&table) {
                let tree = build_index(pager, entry.start_page, &field)?;
                debug!(table = %table, field = %field, entries = tree.stats().entries, "index rebuilt");
                manager.indexes.insert((table, field), tree);
            }
        }
        Ok(manager)
    }

    /// Create an index: persist the `(table, field)` pair and build the tree.
    pub fn create(
        &mut self,
        pager: &mut Pager,
        catalog: &mut Catalog,
        table: &str,
        field: &str,
    ) -> DbResult<()> {
        let key = (table.to_string(), field.to_string());
        if self.indexes.contains_key(&key) {
            return Err(DbError::AlreadyExists(format!(
                "index on '{table}'({field}) already exists"
            )));
        }
        let table_entry = catalog.require(table)?;

        let mut meta = catalog.ensure_system_table(pager, INDEX_TABLE)?;
        let mut record = Row::new();
        record.insert("table".into(), json!(table));
        record.insert("field".into(), json!(field));
        let before = meta.last_page;
        chain::append_row(pager, &mut meta, &record)?;
        if meta.last_page != before {
            catalog.set_last_page(pager, INDEX_TABLE, meta.last_page)?;
        }

        let tree = build_index(pager, table_entry.start_page, field)?;
        self.indexes.insert(key, tree);
        Ok(())
    }

    pub fn get(&self, table: &str, field: &str) -> Option<&BTreeIndex> {
        self.indexes.get(&(table.to_string(), field.to_string()))
    }

    /// Indexed fields for one table.
    pub fn fields_for(&self, table: &str) -> Vec<String> {
        self.indexes
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Every `(table, field, stats)` triple, for SHOW INDEXES.
    pub fn describe(&self) -> Vec<(String, String, index::IndexStats)> {
        let mut rows: Vec<_> = self
            .indexes
            .iter()
            .map(|((t, f), tree)| (t.clone(), f.clone(), tree.stats()))
            .collect();
        rows.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        rows
    }

    /// Drop all indexes over `table`, both in memory and in `_indexes`.
    pub fn drop_for_table(
        &mut self,
        pager: &mut Pager,
        catalog: &Catalog,
        table: &str,
    ) -> DbResult<()> {
        self.indexes.retain(|(t, _), _| t != table);
        if let Some(meta) = catalog.get(INDEX_TABLE) {
            for (page_id, decoded) in chain::scan_chain(pager, meta.start_page)? {
                let kept: Vec<Row> = decoded
                    .rows
                    .iter()
                    .filter(|r| r.get("table").and_then(Value::as_str) != Some(table))
                    .cloned()
                    .collect();
                if kept.len() != decoded.rows.len() {
                    chain::rewrite_page(pager, page_id, &kept)?;
                }
            }
        }
        Ok(())
    }

    /// Synchronous maintenance hooks; a row only appears under fields it has.
    pub fn note_insert(&mut self, table: &str, row: &Row, page: PageId) {
        for ((t, field), tree) in self.indexes.iter_mut() {
            if t == table {
                if let Some(value) = row.get(field) {
                    tree.insert(value, RowRef::new(page));
                }
            }
        }
    }

    pub fn note_delete(&mut self, table: &str, row: &Row, page: PageId) {
        for ((t, field), tree) in self.indexes.iter_mut() {
            if t == table {
                if let Some(value) = row.get(field) {
                    tree.remove(value, RowRef::new(page));
                }
            }
        }
    }

    /// Old entry out before the new one goes in, covering both value changes
    /// and rows that migrated to another page.
    pub fn note_update(
        &mut self,
        table: &str,
        old_row: &Row,
        old_page: PageId,
        new_row: &Row,
        new_page: PageId,
    ) {
        self.note_delete(table, old_row, old_page);
        self.note_insert(table, new_row, new_page);
    }
}

/// Full-scan rebuild of one `(table, field)` tree.
fn build_index(pager: &mut Pager, start: PageId, field: &str) -> DbResult<BTreeIndex> {
    let mut tree = BTreeIndex::new();
    for (page_id, decoded) in chain::scan_chain(pager, start)? {
        for row in &decoded.rows {
            if let Some(value) = row.get(field) {
                tree.insert(value, RowRef::new(page_id));
            }
        }
    }
    Ok(tree)
}
