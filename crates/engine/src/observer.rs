//! Change notification sink.
//!
//! Observers are synchronous callbacks fired after a mutation lands. The
//! audit log is one implementation, appending JSON lines to the database's
//! `.audit` companion file; failures there are logged and swallowed.

use common::Row;
use serde_json::json;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::warn;

/// Synchronous listener for row changes.
pub trait ChangeObserver: Send {
    fn on_insert(&mut self, _table: &str, _row: &Row) {}
    fn on_update(&mut self, _table: &str, _old: &Row, _new: &Row) {}
    fn on_delete(&mut self, _table: &str, _row: &Row) {}
}

/// Append-only JSON-lines audit trail (`<name>.audit`).
pub struct AuditLog {
    file: File,
}

impl AuditLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn write(&mut self, op: &str, table: &str, detail: serde_json::Value) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let line = json!({"ts": ts, "op": op, "table": table, "detail": detail});
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(error = %e, "audit write failed");
        }
    }
}

impl ChangeObserver for AuditLog {
    fn on_insert(&mut self, table: &str, row: &Row) {
        self.write("insert", table, json!(row));
    }

    fn on_update(&mut self, table: &str, old: &Row, new: &Row) {
        self.write("update", table, json!({"old": old, "new": new}));
    }

    fn on_delete(&mut self, table: &str, row: &Row) {
        self.write("delete", table, json!(row));
    }
}
