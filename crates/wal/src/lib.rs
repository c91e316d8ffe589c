//! Write-ahead log for crash recovery and durability.
//!
//! Every page mutation is appended here, and fsynced, before the main file is
//! touched. If the process dies mid-update, replay redoes the committed
//! prefix and discards the rest.
//!
//! # Architecture
//!
//! - **Physical redo records**: whole 4096-byte page images, so replay never
//!   sees a torn page
//! - **Commit watermark**: page writes only apply when a later commit marker
//!   made it to disk
//! - **Length-prefixed framing**: safe forward iteration; a torn tail simply
//!   ends the replay
//! - **Truncate on checkpoint**: once images are applied, the log restarts
//!   empty
//!
//! # Example
//!
//! ```no_run
//! use wal::{Wal, WalOp};
//! use common::{PageId, SyncMode};
//!
//! let mut wal = Wal::open("data/north.wal", SyncMode::Always).unwrap();
//! wal.append_page_write(PageId(3), vec![0u8; 4096]).unwrap();
//! wal.append_commit().unwrap();
//! ```

#[cfg(test)]
mod tests;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PageId, SyncMode};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// A single logged operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// Full image of a page as it should appear in the main file.
    PageWrite { page: PageId, bytes: Vec<u8> },
    /// Marks every earlier record in this log as durable.
    Commit,
}

/// Framed log record: monotonically increasing sequence number plus payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: u64,
    pub op: WalOp,
}

impl WalRecord {
    pub fn is_commit(&self) -> bool {
        matches!(self.op, WalOp::Commit)
    }
}

/// Append-only log manager for one database file.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
    next_lsn: u64,
    sync_mode: SyncMode,
    commits_since_checkpoint: u64,
}

impl Wal {
    /// Open or create the log at `path`. Existing records are preserved; the
    /// next sequence number continues after the highest one on disk.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let next_lsn = match Self::read_records(&path) {
            Ok(records) => records.last().map(|r| r.lsn + 1).unwrap_or(0),
            Err(_) => 0,
        };
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| DbError::Wal(format!("failed to open WAL {}: {e}", path.display())))?;

        Ok(Self {
            path,
            file,
            next_lsn,
            sync_mode,
            commits_since_checkpoint: 0,
        })
    }

    /// Append a full-page image. The frame is written and flushed to the OS
    /// but not fsynced; durability comes from the commit marker.
    pub fn append_page_write(&mut self, page: PageId, bytes: Vec<u8>) -> DbResult<u64> {
        self.append(WalOp::PageWrite { page, bytes })
    }

    /// Append a commit marker and, under `SyncMode::Always`, fsync the log.
    /// Returns the marker's sequence number.
    pub fn append_commit(&mut self) -> DbResult<u64> {
        let lsn = self.append(WalOp::Commit)?;
        if self.sync_mode == SyncMode::Always {
            self.sync()?;
        }
        self.commits_since_checkpoint += 1;
        Ok(lsn)
    }

    fn append(&mut self, op: WalOp) -> DbResult<u64> {
        let lsn = self.next_lsn;
        let record = WalRecord { lsn, op };
        let bytes = encode_to_vec(&record, bincode_config())
            .map_err(|e| DbError::Wal(format!("failed to serialize record: {e}")))?;

        let len = bytes.len() as u32;
        self.file
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|_| self.file.flush())
            .map_err(|e| DbError::Wal(format!("failed to append record: {e}")))?;

        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fsync all appended records.
    pub fn sync(&mut self) -> DbResult<()> {
        self.file
            .sync_all()
            .map_err(|e| DbError::Wal(format!("failed to sync WAL: {e}")))
    }

    /// Commits recorded since the last checkpoint.
    pub fn commits_since_checkpoint(&self) -> u64 {
        self.commits_since_checkpoint
    }

    /// Read the records that recovery must reapply: every `PageWrite` whose
    /// sequence number precedes the last durable commit marker, in order.
    /// Uncommitted tail records are discarded.
    pub fn recover(path: impl AsRef<Path>) -> DbResult<Vec<WalRecord>> {
        let records = Self::read_records(path.as_ref())?;
        let watermark = match records.iter().rev().find(|r| r.is_commit()) {
            Some(commit) => commit.lsn,
            None => {
                if !records.is_empty() {
                    debug!(discarded = records.len(), "no commit marker, discarding WAL tail");
                }
                return Ok(Vec::new());
            }
        };
        Ok(records
            .into_iter()
            .filter(|r| r.lsn <= watermark && !r.is_commit())
            .collect())
    }

    /// Sequentially decode frames until EOF or a torn frame. A truncated tail
    /// is normal after a crash; a record that fails to decode is corruption.
    fn read_records(path: &Path) -> DbResult<Vec<WalRecord>> {
        let mut file = match OpenOptions::new().read(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DbError::Wal(format!("failed to open WAL for replay: {e}"))),
        };

        let mut records = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match read_exact_or_eof(&mut file, &mut len_buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(DbError::Wal(format!("failed to read frame length: {e}"))),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut buf = vec![0u8; len];
            match read_exact_or_eof(&mut file, &mut buf) {
                Ok(true) => {}
                Ok(false) => {
                    // Torn frame at the tail; everything before it stands.
                    warn!(frame_len = len, "torn WAL frame, truncating replay");
                    break;
                }
                Err(e) => return Err(DbError::Wal(format!("failed to read frame body: {e}"))),
            }

            let (record, _) = decode_from_slice::<WalRecord, _>(&buf, bincode_config())
                .map_err(|e| DbError::Wal(format!("corrupt WAL record: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Discard all records after their images have been applied to the main
    /// file. Resets the commit counter but keeps the sequence numbering.
    pub fn checkpoint(&mut self) -> DbResult<()> {
        self.file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to truncate WAL: {e}")))?;
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to reopen WAL: {e}")))?;
        self.commits_since_checkpoint = 0;
        Ok(())
    }

    /// Fsync and release the file handle.
    pub fn close(mut self) -> DbResult<()> {
        self.sync()
    }
}

/// Read into `buf` fully, or return `Ok(false)` if EOF arrives first.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// Bincode configuration for WAL frames: little-endian, fixed-width integers.
fn bincode_config() -> impl Config {
    config::legacy()
}
