//! Fixed-size page codec.
//!
//! A page is 4096 bytes. The header occupies the first eight:
//! next-page pointer (u32 LE at offset 0), record count (u16 LE at 4), free
//! offset (u16 LE at 6). Records are stored upward from offset 8 as
//! `len (u16 LE) ‖ UTF-8 JSON object`.

use common::{DbError, DbResult, PageId, Row};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_LEN: usize = 8;

const OFF_NEXT: usize = 0;
const OFF_COUNT: usize = 4;
const OFF_FREE: usize = 6;

/// One in-memory page image.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// Fresh page with an empty record area: `{next: 0, count: 0, free: 8}`.
    pub fn new(id: PageId) -> Self {
        let mut page = Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        };
        page.set_next(PageId(0));
        page.set_count(0);
        page.set_free_offset(PAGE_HEADER_LEN as u16);
        page
    }

    /// Wrap raw bytes read from disk, validating the header.
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "page {} has {} bytes, expected {PAGE_SIZE}",
                id.0,
                data.len()
            )));
        }
        let page = Self { id, data };
        let free = page.free_offset() as usize;
        if free < PAGE_HEADER_LEN || free > PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "page {} has free offset {free} outside [{PAGE_HEADER_LEN}, {PAGE_SIZE}]",
                id.0
            )));
        }
        Ok(page)
    }

    pub fn next(&self) -> PageId {
        PageId(u32::from_le_bytes(
            self.data[OFF_NEXT..OFF_NEXT + 4].try_into().expect("4 bytes"),
        ))
    }

    pub fn set_next(&mut self, next: PageId) {
        self.data[OFF_NEXT..OFF_NEXT + 4].copy_from_slice(&next.0.to_le_bytes());
    }

    pub fn count(&self) -> u16 {
        u16::from_le_bytes(self.data[OFF_COUNT..OFF_COUNT + 2].try_into().expect("2 bytes"))
    }

    fn set_count(&mut self, count: u16) {
        self.data[OFF_COUNT..OFF_COUNT + 2].copy_from_slice(&count.to_le_bytes());
    }

    pub fn free_offset(&self) -> u16 {
        u16::from_le_bytes(self.data[OFF_FREE..OFF_FREE + 2].try_into().expect("2 bytes"))
    }

    fn set_free_offset(&mut self, free: u16) {
        self.data[OFF_FREE..OFF_FREE + 2].copy_from_slice(&free.to_le_bytes());
    }

    /// Whether a payload of `len` bytes fits in the remaining record area.
    pub fn can_fit(&self, len: usize) -> bool {
        self.free_offset() as usize + 2 + len <= PAGE_SIZE
    }

    /// Largest payload any empty page can hold.
    pub fn max_payload() -> usize {
        PAGE_SIZE - PAGE_HEADER_LEN - 2
    }

    /// Append a serialized row at the free offset.
    pub fn append_record(&mut self, payload: &[u8]) -> DbResult<()> {
        if payload.len() > u16::MAX as usize {
            return Err(DbError::Storage("record exceeds maximum length".into()));
        }
        if !self.can_fit(payload.len()) {
            return Err(DbError::Storage(format!(
                "page {} full: {} byte record does not fit",
                self.id.0,
                payload.len()
            )));
        }
        let start = self.free_offset() as usize;
        let len = payload.len() as u16;
        self.data[start..start + 2].copy_from_slice(&len.to_le_bytes());
        self.data[start + 2..start + 2 + payload.len()].copy_from_slice(payload);
        self.set_free_offset((start + 2 + payload.len()) as u16);
        self.set_count(self.count() + 1);
        Ok(())
    }

    /// Append a row, serializing it to JSON first.
    pub fn append_row(&mut self, row: &Row) -> DbResult<()> {
        let payload = serde_json::to_vec(row)
            .map_err(|e| DbError::Storage(format!("failed to serialize row: {e}")))?;
        self.append_record(&payload)
    }

    /// Decode every record between the header and the free offset.
    pub fn rows(&self) -> DbResult<Vec<Row>> {
        let free = self.free_offset() as usize;
        let mut rows = Vec::with_capacity(self.count() as usize);
        let mut offset = PAGE_HEADER_LEN;
        while offset < free {
            if offset + 2 > free {
                return Err(DbError::Storage(format!(
                    "page {}: record length overruns free offset",
                    self.id.0
                )));
            }
            let len =
                u16::from_le_bytes(self.data[offset..offset + 2].try_into().expect("2 bytes"))
                    as usize;
            let start = offset + 2;
            if start + len > free {
                return Err(DbError::Storage(format!(
                    "page {}: record payload overruns free offset",
                    self.id.0
                )));
            }
            let row: Row = serde_json::from_slice(&self.data[start..start + len])
                .map_err(|e| DbError::Storage(format!("page {}: corrupt record: {e}", self.id.0)))?;
            rows.push(row);
            offset = start + len;
        }
        if rows.len() != self.count() as usize {
            return Err(DbError::Storage(format!(
                "page {}: header count {} does not match {} decoded records",
                self.id.0,
                self.count(),
                rows.len()
            )));
        }
        Ok(rows)
    }

    /// Replace the record area with `rows`, compacting in the process. The
    /// next pointer is preserved. Fails if the rows do not fit.
    pub fn rewrite(&mut self, rows: &[Row]) -> DbResult<()> {
        let next = self.next();
        let id = self.id;
        let mut fresh = Page::new(id);
        fresh.set_next(next);
        for row in rows {
            fresh.append_row(row)?;
        }
        *self = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), json!(id));
        r
    }

    #[test]
    fn new_page_has_empty_header() {
        let page = Page::new(PageId(3));
        assert_eq!(page.next(), PageId(0));
        assert_eq!(page.count(), 0);
        assert_eq!(page.free_offset(), 8);
    }

    #[test]
    fn header_fields_use_fixed_offsets() {
        let mut page = Page::new(PageId(1));
        page.set_next(PageId(0x01020304));
        assert_eq!(&page.data[0..4], &[0x04, 0x03, 0x02, 0x01]);
        page.append_row(&row(1)).unwrap();
        assert_eq!(&page.data[4..6], &[1, 0]);
    }

    #[test]
    fn append_and_decode_round_trip() {
        let mut page = Page::new(PageId(1));
        page.append_row(&row(1)).unwrap();
        page.append_row(&row(2)).unwrap();

        let rows = page.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], json!(2));
    }

    #[test]
    fn record_bytes_are_len_prefixed_json() {
        let mut page = Page::new(PageId(1));
        page.append_row(&row(7)).unwrap();

        let len = u16::from_le_bytes(page.data[8..10].try_into().unwrap()) as usize;
        let payload = &page.data[10..10 + len];
        assert_eq!(serde_json::from_slice::<Row>(payload).unwrap()["id"], json!(7));
        assert_eq!(page.free_offset() as usize, 10 + len);
    }

    #[test]
    fn full_page_rejects_append() {
        let mut page = Page::new(PageId(1));
        let mut big = Row::new();
        big.insert("blob".into(), json!("x".repeat(3000)));
        page.append_row(&big).unwrap();
        assert!(page.append_row(&big).is_err());
        // Still decodable after the failed append.
        assert_eq!(page.rows().unwrap().len(), 1);
    }

    #[test]
    fn rewrite_compacts_and_keeps_next() {
        let mut page = Page::new(PageId(1));
        page.set_next(PageId(9));
        for i in 0..5 {
            page.append_row(&row(i)).unwrap();
        }
        let before = page.free_offset();

        let mut rows = page.rows().unwrap();
        rows.remove(2);
        page.rewrite(&rows).unwrap();

        assert_eq!(page.next(), PageId(9));
        assert_eq!(page.count(), 4);
        assert!(page.free_offset() < before);
        assert!(page.rows().unwrap().iter().all(|r| r["id"] != json!(2)));
    }

    #[test]
    fn from_bytes_rejects_bad_free_offset() {
        let mut data = vec![0u8; PAGE_SIZE];
        data[6] = 0xFF;
        data[7] = 0xFF;
        assert!(Page::from_bytes(PageId(1), data).is_err());
    }
}
