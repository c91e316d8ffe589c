//! Self-hosted catalog.
//!
//! The catalog table `_tables` lives in the same page space it describes:
//! page 0 is its first page, and its first record is its own entry. Every
//! other table (user or system) is one `{name, startPage, lastPage, system}`
//! record somewhere on that chain.

use crate::chain;
use common::{DbError, DbResult, PageId, Row};
use hashbrown::HashMap;
use pager::Pager;
use serde_json::{json, Value};
use tracing::debug;

pub const CATALOG_TABLE: &str = "_tables";
pub const INDEX_TABLE: &str = "_indexes";
pub const VIEW_TABLE: &str = "_views";
pub const SCHEMA_TABLE: &str = "_schemas";
pub const TRIGGER_TABLE: &str = "_triggers";
pub const PROCEDURE_TABLE: &str = "_procedures";

/// On-disk format revision, carried on the catalog's self entry.
pub const FORMAT_VERSION: u64 = 1;

/// Reserved names all start with an underscore.
pub fn is_system_name(name: &str) -> bool {
    name.starts_with('_')
}

/// Metadata record for one table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableEntry {
    pub name: String,
    pub start_page: PageId,
    pub last_page: PageId,
    pub system: bool,
}

impl TableEntry {
    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), json!(self.name));
        row.insert("startPage".into(), json!(self.start_page.0));
        row.insert("lastPage".into(), json!(self.last_page.0));
        if self.system {
            row.insert("system".into(), json!(true));
        }
        if self.name == CATALOG_TABLE {
            row.insert("version".into(), json!(FORMAT_VERSION));
        }
        row
    }

    pub(crate) fn from_row(row: &Row) -> DbResult<Self> {
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DbError::Storage("catalog record without a name".into()))?;
        let start = row
            .get("startPage")
            .and_then(Value::as_u64)
            .ok_or_else(|| DbError::Storage(format!("catalog record '{name}' missing startPage")))?;
        let last = row
            .get("lastPage")
            .and_then(Value::as_u64)
            .ok_or_else(|| DbError::Storage(format!("catalog record '{name}' missing lastPage")))?;
        Ok(Self {
            name: name.to_string(),
            start_page: PageId(start as u32),
            last_page: PageId(last as u32),
            system: row.get("system").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// In-memory image of `_tables`, kept in lockstep with the chain on disk.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<TableEntry>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// First open: write page 0 with the catalog's own entry.
    pub fn bootstrap(pager: &mut Pager) -> DbResult<Self> {
        let root = pager.alloc_page()?;
        debug_assert!(root.is_terminator(), "catalog must root at page 0");

        let self_entry = TableEntry {
            name: CATALOG_TABLE.to_string(),
            start_page: root,
            last_page: root,
            system: true,
        };
        let mut page = pager.read_page(root)?;
        page.append_row(&self_entry.to_row())?;
        pager.write_page(page)?;
        pager.commit()?;

        let mut catalog = Self {
            entries: vec![self_entry],
            by_name: HashMap::new(),
        };
        catalog.reindex();
        Ok(catalog)
    }

    /// Load every entry by walking the catalog chain from page 0.
    pub fn load(pager: &mut Pager) -> DbResult<Self> {
        let mut entries = Vec::new();
        for (_, decoded) in chain::scan_chain(pager, PageId(0))? {
            for row in &decoded.rows {
                entries.push(TableEntry::from_row(row)?);
            }
        }

        let self_entry = entries
            .iter()
            .find(|e| e.name == CATALOG_TABLE)
            .ok_or_else(|| DbError::Storage("catalog self entry missing".into()))?;
        if self_entry.start_page != PageId(0) {
            return Err(DbError::Storage("catalog does not start at page 0".into()));
        }

        // The version rides on the self entry's raw row.
        let version = chain::scan_chain(pager, PageId(0))?
            .iter()
            .flat_map(|(_, d)| d.rows.iter())
            .find(|r| r.get("name").and_then(Value::as_str) == Some(CATALOG_TABLE))
            .and_then(|r| r.get("version").and_then(Value::as_u64))
            .unwrap_or(FORMAT_VERSION);
        if version > FORMAT_VERSION {
            return Err(DbError::Storage(format!(
                "database format version {version} is newer than supported {FORMAT_VERSION}"
            )));
        }

        let mut catalog = Self {
            entries,
            by_name: HashMap::new(),
        };
        catalog.reindex();
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&TableEntry> {
        self.by_name.get(name).map(|idx| &self.entries[*idx])
    }

    pub fn require(&self, name: &str) -> DbResult<TableEntry> {
        self.get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}' does not exist")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.iter()
    }

    /// Create a table: allocate its first page and record it in the chain.
    pub fn create_table(&mut self, pager: &mut Pager, name: &str, system: bool) -> DbResult<()> {
        if self.get(name).is_some() {
            return Err(DbError::AlreadyExists(format!("table '{name}' already exists")));
        }
        let start = pager.alloc_page()?;
        let entry = TableEntry {
            name: name.to_string(),
            start_page: start,
            last_page: start,
            system,
        };

        self.append_catalog_row(pager, &entry.to_row())?;
        self.entries.push(entry);
        self.reindex();
        debug!(table = name, page = start.0, "table created");
        Ok(())
    }

    /// Remove a table's entry. Its pages stay allocated (no reclamation).
    pub fn drop_table(&mut self, pager: &mut Pager, name: &str) -> DbResult<()> {
        if self.get(name).is_none() {
            return Err(DbError::NotFound(format!("table '{name}' does not exist")));
        }
        self.remove_catalog_row(pager, name)?;
        self.entries.retain(|e| e.name != name);
        self.reindex();
        Ok(())
    }

    /// Persist a changed `lastPage` for `name`.
    pub fn set_last_page(&mut self, pager: &mut Pager, name: &str, last: PageId) -> DbResult<()> {
        let idx = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}' does not exist")))?;
        if self.entries[idx].last_page == last {
            return Ok(());
        }
        self.entries[idx].last_page = last;
        let row = self.entries[idx].to_row();
        self.replace_catalog_row(pager, name, row)
    }

    /// System tables come into being on first access.
    pub fn ensure_system_table(&mut self, pager: &mut Pager, name: &str) -> DbResult<TableEntry> {
        if self.get(name).is_none() {
            self.create_table(pager, name, true)?;
        }
        self.require(name)
    }

    fn reindex(&mut self) {
        self.by_name.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.by_name.insert(entry.name.clone(), idx);
        }
    }

    fn self_entry(&self) -> TableEntry {
        self.get(CATALOG_TABLE).cloned().expect("catalog self entry")
    }

    /// Append a record to the `_tables` chain, persisting the chain's own
    /// growth through its self entry.
    fn append_catalog_row(&mut self, pager: &mut Pager, row: &Row) -> DbResult<()> {
        let mut self_entry = self.self_entry();
        let before = self_entry.last_page;
        chain::append_row(pager, &mut self_entry, row)?;
        if self_entry.last_page != before {
            let idx = self.by_name[CATALOG_TABLE];
            self.entries[idx].last_page = self_entry.last_page;
            let self_row = self.entries[idx].to_row();
            self.replace_catalog_row(pager, CATALOG_TABLE, self_row)?;
        }
        Ok(())
    }

    /// Rewrite the page holding `name`'s record with `row` in its place.
    /// If the grown record no longer fits, it moves to the chain's tail.
    fn replace_catalog_row(&mut self, pager: &mut Pager, name: &str, row: Row) -> DbResult<()> {
        for (page_id, decoded) in chain::scan_chain(pager, PageId(0))? {
            let pos = decoded
                .rows
                .iter()
                .position(|r| r.get("name").and_then(Value::as_str) == Some(name));
            if let Some(pos) = pos {
                let mut rows = decoded.rows.clone();
                rows[pos] = row;
                match chain::rewrite_page(pager, page_id, &rows) {
                    Ok(()) => return Ok(()),
                    Err(_) => {
                        // Tight page: evict the record and re-append it.
                        let moved = rows.remove(pos);
                        chain::rewrite_page(pager, page_id, &rows)?;
                        return self.append_catalog_row(pager, &moved);
                    }
                }
            }
        }
        Err(DbError::Storage(format!("catalog record '{name}' vanished")))
    }

    fn remove_catalog_row(&mut self, pager: &mut Pager, name: &str) -> DbResult<()> {
        for (page_id, decoded) in chain::scan_chain(pager, PageId(0))? {
            let pos = decoded
                .rows
                .iter()
                .position(|r| r.get("name").and_then(Value::as_str) == Some(name));
            if let Some(pos) = pos {
                let mut rows = decoded.rows.clone();
                rows.remove(pos);
                return chain::rewrite_page(pager, page_id, &rows);
            }
        }
        Err(DbError::Storage(format!("catalog record '{name}' vanished")))
    }
}
