//! Page-chain plumbing shared by the catalog and the executors.
//!
//! Every table is a singly linked list of pages terminated by a zero next
//! pointer. Appends always land on the chain's last page, allocating and
//! linking a fresh page when the record does not fit.

use crate::catalog::TableEntry;
use common::{DbError, DbResult, PageId, Row};
use pager::{DecodedPage, Page, Pager};
use std::sync::Arc;

/// Walk a chain, yielding each page's decoded rows from the object cache.
pub(crate) fn scan_chain(
    pager: &mut Pager,
    start: PageId,
) -> DbResult<Vec<(PageId, Arc<DecodedPage>)>> {
    let mut pages = Vec::new();
    let mut current = start;
    loop {
        let decoded = pager.read_page_objects(current)?;
        let next = decoded.next;
        pages.push((current, decoded));
        if next.is_terminator() {
            return Ok(pages);
        }
        current = next;
    }
}

/// Append one row to a table, allocating a new last page when needed.
/// Returns the page that received the row; `entry.last_page` is updated in
/// place and must be persisted by the caller when it changed.
pub(crate) fn append_row(pager: &mut Pager, entry: &mut TableEntry, row: &Row) -> DbResult<PageId> {
    let payload = serde_json::to_vec(row)
        .map_err(|e| DbError::Storage(format!("failed to serialize row: {e}")))?;
    if payload.len() > Page::max_payload() {
        return Err(DbError::Constraint(format!(
            "row of {} bytes exceeds page capacity",
            payload.len()
        )));
    }

    let mut last = pager.read_page(entry.last_page)?;
    if last.can_fit(payload.len()) {
        last.append_record(&payload)?;
        let id = last.id;
        pager.write_page(last)?;
        return Ok(id);
    }

    // Chain grows by one page.
    let fresh_id = pager.alloc_page()?;
    last.set_next(fresh_id);
    pager.write_page(last)?;

    let mut fresh = pager.read_page(fresh_id)?;
    fresh.append_record(&payload)?;
    pager.write_page(fresh)?;
    entry.last_page = fresh_id;
    Ok(fresh_id)
}

/// Replace one page's rows, compacting the record area.
pub(crate) fn rewrite_page(pager: &mut Pager, page_id: PageId, rows: &[Row]) -> DbResult<()> {
    let mut page = pager.read_page(page_id)?;
    page.rewrite(rows)?;
    pager.write_page(page)
}

/// Total row count across a chain.
pub(crate) fn count_rows(pager: &mut Pager, start: PageId) -> DbResult<u64> {
    let mut total = 0u64;
    for (_, decoded) in scan_chain(pager, start)? {
        total += decoded.rows.len() as u64;
    }
    Ok(total)
}
