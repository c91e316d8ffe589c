use super::*;
use std::io::Write as _;
use tempfile::TempDir;

fn wal_path(temp: &TempDir) -> std::path::PathBuf {
    temp.path().join("test.wal")
}

fn page(fill: u8) -> Vec<u8> {
    vec![fill; 4096]
}

#[test]
fn empty_log_recovers_nothing() {
    let temp = TempDir::new().unwrap();
    let records = Wal::recover(wal_path(&temp)).unwrap();
    assert!(records.is_empty());
}

#[test]
fn committed_writes_replay_in_order() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
    wal.append_page_write(PageId(1), page(0xAA)).unwrap();
    wal.append_page_write(PageId(2), page(0xBB)).unwrap();
    wal.append_commit().unwrap();

    let records = Wal::recover(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lsn, 0);
    match &records[1].op {
        WalOp::PageWrite { page, bytes } => {
            assert_eq!(*page, PageId(2));
            assert_eq!(bytes[0], 0xBB);
        }
        other => panic!("unexpected op {other:?}"),
    }
}

#[test]
fn uncommitted_tail_is_discarded() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
    wal.append_page_write(PageId(1), page(1)).unwrap();
    wal.append_commit().unwrap();
    // Crash before this write commits.
    wal.append_page_write(PageId(2), page(2)).unwrap();

    let records = Wal::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0].op, WalOp::PageWrite { page, .. } if page == PageId(1)));
}

#[test]
fn no_commit_means_no_replay() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
    wal.append_page_write(PageId(1), page(1)).unwrap();

    assert!(Wal::recover(&path).unwrap().is_empty());
}

#[test]
fn torn_frame_terminates_replay() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    {
        let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
        wal.append_page_write(PageId(1), page(1)).unwrap();
        wal.append_commit().unwrap();
    }

    // Append a frame header promising more bytes than exist.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&9999u32.to_le_bytes()).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);

    let records = Wal::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn lsn_continues_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    {
        let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
        assert_eq!(wal.append_page_write(PageId(1), page(1)).unwrap(), 0);
        assert_eq!(wal.append_commit().unwrap(), 1);
    }
    {
        let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
        assert_eq!(wal.append_page_write(PageId(1), page(2)).unwrap(), 2);
    }
}

#[test]
fn checkpoint_truncates() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    let mut wal = Wal::open(&path, SyncMode::Always).unwrap();
    wal.append_page_write(PageId(1), page(1)).unwrap();
    wal.append_commit().unwrap();
    assert_eq!(wal.commits_since_checkpoint(), 1);

    wal.checkpoint().unwrap();
    assert_eq!(wal.commits_since_checkpoint(), 0);
    assert!(Wal::recover(&path).unwrap().is_empty());

    // The log is usable after a checkpoint.
    wal.append_page_write(PageId(3), page(3)).unwrap();
    wal.append_commit().unwrap();
    assert_eq!(Wal::recover(&path).unwrap().len(), 1);
}

#[test]
fn recovery_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let path = wal_path(&temp);

    let mut wal = Wal::open(&path, SyncMode::Batch).unwrap();
    wal.append_page_write(PageId(1), page(7)).unwrap();
    wal.append_commit().unwrap();
    wal.sync().unwrap();

    let first = Wal::recover(&path).unwrap();
    let second = Wal::recover(&path).unwrap();
    assert_eq!(first, second);
}
