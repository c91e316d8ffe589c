//! INSERT, UPDATE and DELETE execution.
//!
//! Mutations work page-at-a-time: matching rows are located (index fast path
//! or chain walk), each touched page is rewritten compacted, and rows that
//! no longer fit their page move to the end of the chain. Indexes, triggers,
//! observers and the catalog's `lastPage` are maintained in the same pass,
//! and the statement ends with one durable commit point.

use crate::coerce::coerce_row;
use crate::db::{Database, QueryOutput};
use crate::filter;
use crate::{catalog::is_system_name, chain};
use common::{DbError, DbResult, PageId, Row};
use parser::{Criteria, TriggerEvent, TriggerTiming};
use serde_json::Value;

impl Database {
    pub(crate) fn exec_insert(&mut self, table: &str, rows: Vec<Row>) -> DbResult<QueryOutput> {
        reject_system_write(table)?;
        self.catalog.require(table)?;
        let schema = self.schema_for(table);

        let mut inserted = 0u64;
        for row in rows {
            let row = match &schema {
                Some(s) => coerce_row(s, &row)?,
                None => row,
            };

            self.fire_triggers(table, TriggerTiming::Before, TriggerEvent::Insert);

            // Triggers may have grown the table; re-read the entry so the
            // append lands on the true last page.
            let mut entry = self.catalog.require(table)?;
            let page = chain::append_row(&mut self.pager, &mut entry, &row)?;
            self.catalog
                .set_last_page(&mut self.pager, table, entry.last_page)?;
            self.indexes.note_insert(table, &row, page);

            self.fire_triggers(table, TriggerTiming::After, TriggerEvent::Insert);
            self.notify_insert(table, &row);
            inserted += 1;
        }

        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("{inserted} row(s) inserted")))
    }

    pub(crate) fn exec_update(
        &mut self,
        table: &str,
        assignments: &[(String, Value)],
        criteria: Option<&Criteria>,
    ) -> DbResult<QueryOutput> {
        reject_system_write(table)?;
        let entry = self.catalog.require(table)?;
        let schema = self.schema_for(table);
        let compiled = criteria.map(filter::compile).transpose()?;

        self.fire_triggers(table, TriggerTiming::Before, TriggerEvent::Update);

        let pages = self.pages_to_touch(table, &entry, criteria)?;
        let mut updated = 0u64;
        // Rows that outgrew their page, re-appended after the page pass.
        let mut moved: Vec<(Row, Row, PageId)> = Vec::new();

        for page_id in pages {
            let decoded = self.pager.read_page_objects(page_id)?;
            let mut rows = decoded.rows.clone();
            drop(decoded);

            let mut changes: Vec<(usize, Row, Row)> = Vec::new();
            for (idx, slot) in rows.iter_mut().enumerate() {
                let hit = compiled.as_ref().map(|c| filter::eval(c, slot)).unwrap_or(true);
                if !hit {
                    continue;
                }
                let old = slot.clone();
                let mut new = old.clone();
                for (field, value) in assignments {
                    new.insert(field.clone(), value.clone());
                }
                if let Some(s) = &schema {
                    new = coerce_row(s, &new)?;
                }
                *slot = new.clone();
                changes.push((idx, old, new));
            }
            if changes.is_empty() {
                continue;
            }

            match chain::rewrite_page(&mut self.pager, page_id, &rows) {
                Ok(()) => {
                    updated += changes.len() as u64;
                    for (_, old, new) in &changes {
                        self.indexes.note_update(table, old, page_id, new, page_id);
                        self.notify_update(table, old, new);
                    }
                }
                Err(_) => {
                    // Grown rows no longer fit: keep the untouched rows here
                    // and push the updated ones to the end of the chain.
                    let changed: Vec<usize> = changes.iter().map(|(i, _, _)| *i).collect();
                    let keep: Vec<Row> = rows
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !changed.contains(i))
                        .map(|(_, r)| r.clone())
                        .collect();
                    chain::rewrite_page(&mut self.pager, page_id, &keep)?;
                    for (_, old, new) in changes {
                        moved.push((old, new, page_id));
                    }
                }
            }
        }

        for (old, new, old_page) in moved {
            let mut entry = self.catalog.require(table)?;
            let new_page = chain::append_row(&mut self.pager, &mut entry, &new)?;
            self.catalog
                .set_last_page(&mut self.pager, table, entry.last_page)?;
            self.indexes.note_update(table, &old, old_page, &new, new_page);
            self.notify_update(table, &old, &new);
            updated += 1;
        }

        self.fire_triggers(table, TriggerTiming::After, TriggerEvent::Update);
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("{updated} row(s) updated")))
    }

    pub(crate) fn exec_delete(
        &mut self,
        table: &str,
        criteria: Option<&Criteria>,
    ) -> DbResult<QueryOutput> {
        reject_system_write(table)?;
        let entry = self.catalog.require(table)?;
        let compiled = criteria.map(filter::compile).transpose()?;

        self.fire_triggers(table, TriggerTiming::Before, TriggerEvent::Delete);

        let pages = self.pages_to_touch(table, &entry, criteria)?;
        let mut deleted = 0u64;
        for page_id in pages {
            let decoded = self.pager.read_page_objects(page_id)?;
            let rows = decoded.rows.clone();
            drop(decoded);

            let (removed, kept): (Vec<Row>, Vec<Row>) = rows.into_iter().partition(|row| {
                compiled.as_ref().map(|c| filter::eval(c, row)).unwrap_or(true)
            });
            if removed.is_empty() {
                continue;
            }

            chain::rewrite_page(&mut self.pager, page_id, &kept)?;
            for row in &removed {
                self.indexes.note_delete(table, row, page_id);
                self.notify_delete(table, row);
            }
            deleted += removed.len() as u64;
        }

        self.fire_triggers(table, TriggerTiming::After, TriggerEvent::Delete);
        self.pager.commit()?;
        Ok(QueryOutput::Message(format!("{deleted} row(s) deleted")))
    }

    /// Pages that can contain matches: the index narrows a single equality,
    /// anything else walks the whole chain.
    fn pages_to_touch(
        &mut self,
        table: &str,
        entry: &crate::catalog::TableEntry,
        criteria: Option<&Criteria>,
    ) -> DbResult<Vec<PageId>> {
        if let Some((field, value)) = self.index_fast_path(table, criteria) {
            let tree = self.indexes.get(table, field).expect("checked");
            let mut pages: Vec<PageId> = tree.find(value).into_iter().map(|r| r.page).collect();
            pages.sort();
            pages.dedup();
            return Ok(pages);
        }
        Ok(chain::scan_chain(&mut self.pager, entry.start_page)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}

/// DML must not touch the reserved system tables.
fn reject_system_write(table: &str) -> DbResult<()> {
    if is_system_name(table) {
        return Err(DbError::Constraint(format!(
            "'{table}' is a reserved system table"
        )));
    }
    Ok(())
}
