//! Storage and execution core for one database file.
//!
//! A [`Database`] ties together the pager (4096-byte pages, two-tier LRU
//! cache), the write-ahead log, the self-hosted catalog rooted at page 0,
//! in-memory B-tree indexes, and the statement executors. A database is
//! owned by exactly one worker thread at a time; nothing here locks.
//!
//! # Example
//!
//! ```no_run
//! use engine::{Database, DatabaseOptions, QueryOutput};
//!
//! let mut db = Database::open("kebun.sawit", DatabaseOptions::default()).unwrap();
//! db.execute_text("CREATE TABLE panen", None, 1).unwrap();
//! db.execute_text("INSERT INTO panen (blok, berat) VALUES ('A1', 750)", None, 1).unwrap();
//! match db.execute_text("SELECT * FROM panen WHERE blok = 'A1'", None, 1).unwrap() {
//!     QueryOutput::Rows(rows) => assert_eq!(rows.len(), 1),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

mod aggregate;
mod catalog;
mod chain;
mod coerce;
mod db;
mod dml;
mod explain;
mod filter;
mod indexes;
mod meta;
mod observer;
mod select;
mod txn;

pub use catalog::{
    is_system_name, TableEntry, CATALOG_TABLE, FORMAT_VERSION, INDEX_TABLE, PROCEDURE_TABLE,
    SCHEMA_TABLE, TRIGGER_TABLE, VIEW_TABLE,
};
pub use db::{Database, DatabaseOptions, QueryOutput};
pub use observer::{AuditLog, ChangeObserver};
