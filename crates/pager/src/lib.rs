//! Page allocator and two-tier cache over one database file.
//!
//! The pager owns the file handle and every page that moves between disk and
//! the executors. Reads go through two LRU tiers: a buffer cache of raw
//! 4096-byte pages and an object cache of decoded row vectors behind `Arc`,
//! so repeated scans of a hot page never re-parse JSON. Writes append a
//! full-page image to the attached WAL before the buffer is dirtied; the
//! main file only advances at commit/flush time.
//!
//! # Example
//!
//! ```no_run
//! use pager::{Page, Pager, PagerOptions};
//!
//! let mut pager = Pager::open("north.sawit", None, PagerOptions::default()).unwrap();
//! let id = pager.alloc_page().unwrap();
//! let mut page = pager.read_page(id).unwrap();
//! page.append_row(&serde_json::Map::new()).unwrap();
//! pager.write_page(page).unwrap();
//! pager.commit().unwrap();
//! ```

mod page;

pub use page::{Page, PAGE_HEADER_LEN, PAGE_SIZE};

use common::{DbError, DbResult, PageId, Row};
use hashbrown::HashSet;
use lru::LruCache;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};
use wal::{Wal, WalOp};

/// A page decoded to row objects, shared out of the object cache without
/// copying. `next` is carried so chain walks need not touch the raw page.
#[derive(Debug)]
pub struct DecodedPage {
    pub next: PageId,
    pub rows: Vec<Row>,
}

/// Cache capacities and checkpoint cadence.
#[derive(Clone, Copy, Debug)]
pub struct PagerOptions {
    pub buffer_pages: usize,
    pub object_pages: usize,
    /// Checkpoint the WAL after this many commits; 0 disables.
    pub checkpoint_interval: u64,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            buffer_pages: 256,
            object_pages: 64,
            checkpoint_interval: 128,
        }
    }
}

/// Counters surfaced by SHOW STATS.
#[derive(Clone, Copy, Debug, Default)]
pub struct PagerStats {
    pub pages: u32,
    pub buffered: usize,
    pub objects: usize,
    pub dirty: usize,
}

/// Buffer manager for one database file.
#[derive(Debug)]
pub struct Pager {
    path: PathBuf,
    file: File,
    num_pages: u32,
    buffer: LruCache<PageId, Page>,
    objects: LruCache<PageId, Arc<DecodedPage>>,
    dirty: HashSet<PageId>,
    wal: Option<Wal>,
    checkpoint_interval: u64,
}

impl Pager {
    /// Open the database file, replaying the WAL first if one is attached.
    /// The file is created empty when missing; callers bootstrap page 0.
    pub fn open(path: impl AsRef<Path>, wal: Option<Wal>, opts: PagerOptions) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut wal = wal;
        if let Some(w) = wal.as_mut() {
            replay_into(&path, w)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| DbError::Storage(format!("failed to open {}: {e}", path.display())))?;

        let len = file
            .metadata()
            .map_err(|e| DbError::Storage(format!("failed to stat {}: {e}", path.display())))?
            .len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Storage(format!(
                "{} is not page aligned ({len} bytes)",
                path.display()
            )));
        }

        let buffer_cap = NonZeroUsize::new(opts.buffer_pages.max(1)).expect("nonzero");
        let object_cap = NonZeroUsize::new(opts.object_pages.max(1)).expect("nonzero");

        Ok(Self {
            path,
            file,
            num_pages: (len / PAGE_SIZE as u64) as u32,
            buffer: LruCache::new(buffer_cap),
            objects: LruCache::new(object_cap),
            dirty: HashSet::new(),
            wal,
            checkpoint_interval: opts.checkpoint_interval,
        })
    }

    /// Number of pages currently in the file (including page 0).
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn stats(&self) -> PagerStats {
        PagerStats {
            pages: self.num_pages,
            buffered: self.buffer.len(),
            objects: self.objects.len(),
            dirty: self.dirty.len(),
        }
    }

    /// Fetch a page image, from the buffer cache when hot.
    pub fn read_page(&mut self, id: PageId) -> DbResult<Page> {
        if let Some(page) = self.buffer.get(&id) {
            return Ok(page.clone());
        }
        let page = self.load_page(id)?;
        self.insert_buffered(page.clone())?;
        Ok(page)
    }

    /// Fetch a page's decoded rows and next pointer. The `Arc` comes straight
    /// from the object cache, so hot pages are never re-parsed or copied.
    pub fn read_page_objects(&mut self, id: PageId) -> DbResult<Arc<DecodedPage>> {
        if let Some(decoded) = self.objects.get(&id) {
            return Ok(Arc::clone(decoded));
        }
        let page = self.read_page(id)?;
        let decoded = Arc::new(DecodedPage {
            next: page.next(),
            rows: page.rows()?,
        });
        self.objects.push(id, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Stage a page image. The image is WAL-logged immediately and the
    /// object-cache entry for the id is invalidated; the main file is only
    /// written at commit/flush/eviction.
    pub fn write_page(&mut self, page: Page) -> DbResult<()> {
        if page.id.0 >= self.num_pages {
            return Err(DbError::Storage(format!(
                "page {} out of range ({} pages)",
                page.id.0, self.num_pages
            )));
        }
        if let Some(wal) = self.wal.as_mut() {
            wal.append_page_write(page.id, page.data.clone())?;
        }
        self.objects.pop(&page.id);
        self.dirty.insert(page.id);
        let id = page.id;
        self.buffer.pop(&id);
        self.insert_buffered(page)?;
        Ok(())
    }

    /// Extend the file by one empty page and return its id.
    pub fn alloc_page(&mut self) -> DbResult<PageId> {
        let id = PageId(self.num_pages);
        let page = Page::new(id);
        self.file
            .seek(SeekFrom::Start(id.0 as u64 * PAGE_SIZE as u64))
            .and_then(|_| self.file.write_all(&page.data))
            .map_err(|e| DbError::OutOfSpace(format!("failed to extend file: {e}")))?;
        self.num_pages += 1;
        self.insert_buffered(page)?;
        Ok(id)
    }

    /// Durable commit point: the commit marker reaches the WAL (fsynced under
    /// `SyncMode::Always`) before any dirty page touches the main file.
    pub fn commit(&mut self) -> DbResult<()> {
        if let Some(wal) = self.wal.as_mut() {
            wal.append_commit()?;
        }
        self.write_dirty()?;
        if self.checkpoint_interval > 0 {
            let due = self
                .wal
                .as_ref()
                .map(|w| w.commits_since_checkpoint() >= self.checkpoint_interval)
                .unwrap_or(false);
            if due {
                self.checkpoint()?;
            }
        }
        Ok(())
    }

    /// Force everything to durable storage: dirty pages, file fsync, WAL fsync.
    pub fn flush(&mut self) -> DbResult<()> {
        self.write_dirty()?;
        self.file
            .sync_all()
            .map_err(|e| DbError::Storage(format!("failed to sync file: {e}")))?;
        if let Some(wal) = self.wal.as_mut() {
            wal.sync()?;
        }
        Ok(())
    }

    /// Apply and truncate the WAL once the main file is durably up to date.
    pub fn checkpoint(&mut self) -> DbResult<()> {
        self.write_dirty()?;
        self.file
            .sync_all()
            .map_err(|e| DbError::Storage(format!("failed to sync file: {e}")))?;
        if let Some(wal) = self.wal.as_mut() {
            wal.checkpoint()?;
        }
        debug!(path = %self.path.display(), "checkpoint complete");
        Ok(())
    }

    /// Flush, checkpoint, and release the file handles.
    pub fn close(mut self) -> DbResult<()> {
        self.flush()?;
        if let Some(mut wal) = self.wal.take() {
            wal.checkpoint()?;
            wal.close()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_page(&mut self, id: PageId) -> DbResult<Page> {
        if id.0 >= self.num_pages {
            return Err(DbError::Storage(format!(
                "page {} out of range ({} pages)",
                id.0, self.num_pages
            )));
        }
        self.file
            .seek(SeekFrom::Start(id.0 as u64 * PAGE_SIZE as u64))
            .map_err(|e| DbError::Storage(format!("failed to seek to page {}: {e}", id.0)))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| DbError::Storage(format!("short read on page {}: {e}", id.0)))?;
        Page::from_bytes(id, buf)
    }

    /// Insert into the buffer cache, spilling the least-recently-used entry
    /// to disk first when it is dirty.
    fn insert_buffered(&mut self, page: Page) -> DbResult<()> {
        while self.buffer.len() >= self.buffer.cap().get() {
            match self.buffer.pop_lru() {
                Some((evicted_id, evicted)) => {
                    if self.dirty.remove(&evicted_id) {
                        // The page's WAL image may not be durable yet.
                        if let Some(wal) = self.wal.as_mut() {
                            wal.sync()?;
                        }
                        warn!(page = evicted_id.0, "evicting dirty page");
                        self.write_to_file(&evicted)?;
                    }
                }
                None => break,
            }
        }
        self.buffer.push(page.id, page);
        Ok(())
    }

    fn write_dirty(&mut self) -> DbResult<()> {
        let mut ids: Vec<PageId> = self.dirty.iter().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(page) = self.buffer.peek(&id) {
                let page = page.clone();
                self.write_to_file(&page)?;
            }
            self.dirty.remove(&id);
        }
        Ok(())
    }

    fn write_to_file(&mut self, page: &Page) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(page.id.0 as u64 * PAGE_SIZE as u64))
            .and_then(|_| self.file.write_all(&page.data))
            .map_err(|e| DbError::Storage(format!("failed to write page {}: {e}", page.id.0)))
    }
}

/// Apply committed WAL images to the main file, then truncate the log.
/// Idempotent: replaying the same log twice writes the same bytes.
fn replay_into(path: &Path, wal: &mut Wal) -> DbResult<()> {
    let records = Wal::recover(wal_path_of(wal))?;
    if records.is_empty() {
        return Ok(());
    }
    debug!(count = records.len(), path = %path.display(), "replaying WAL");

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| DbError::Storage(format!("failed to open {} for replay: {e}", path.display())))?;

    for record in records {
        if let WalOp::PageWrite { page, bytes } = record.op {
            if bytes.len() != PAGE_SIZE {
                return Err(DbError::Storage(format!(
                    "WAL image for page {} has {} bytes",
                    page.0,
                    bytes.len()
                )));
            }
            file.seek(SeekFrom::Start(page.0 as u64 * PAGE_SIZE as u64))
                .and_then(|_| file.write_all(&bytes))
                .map_err(|e| DbError::Storage(format!("replay write to page {} failed: {e}", page.0)))?;
        }
    }
    file.sync_all()
        .map_err(|e| DbError::Storage(format!("failed to sync after replay: {e}")))?;
    wal.checkpoint()?;
    Ok(())
}

fn wal_path_of(wal: &Wal) -> PathBuf {
    wal.path().to_path_buf()
}
