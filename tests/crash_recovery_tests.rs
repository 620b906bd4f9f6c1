// Crash Recovery Tests for edbm
// These tests verify data consistency after simulated crashes

use edbm::{Database, DbPaths, Options};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper function to simulate a crash by dropping the handle without closing it.
/// Uses mem::forget to prevent Drop from running (simulates abrupt termination)
fn simulate_crash(db: Database) {
    std::mem::forget(db);
}

fn create(dir: &TempDir) -> PathBuf {
    let name = dir.path().join("db");
    edbm::truncate(&name).unwrap();
    name
}

/// Test every completed put is visible after a crash
#[test]
fn test_recovery_after_write_crash() {
    let dir = TempDir::new().unwrap();
    let name = create(&dir);

    {
        let mut db = Database::open(&name, Options::default()).unwrap();
        for i in 0..1000 {
            db.put(format!("key{:04}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        simulate_crash(db);
    }

    let mut db = Database::open(&name, Options::default()).unwrap();
    for i in 0..1000 {
        assert_eq!(
            db.fetch(format!("key{:04}", i).as_bytes()).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }
}

/// Test deletes are visible after a crash
#[test]
fn test_recovery_after_delete_crash() {
    let dir = TempDir::new().unwrap();
    let name = create(&dir);

    {
        let mut db = Database::open(&name, Options::default().sync_writes(true)).unwrap();
        for i in 0..100 {
            db.put(format!("key{}", i).as_bytes(), b"v").unwrap();
        }
        for i in 0..50 {
            assert!(db.remove(format!("key{}", i).as_bytes()).unwrap());
        }
        simulate_crash(db);
    }

    let mut db = Database::open(&name, Options::default()).unwrap();
    assert_eq!(db.entries().count(), 50);
}

/// Test a value appended without its index record is simply unreachable
#[test]
fn test_orphaned_content_is_harmless() {
    let dir = TempDir::new().unwrap();
    let name = create(&dir);

    {
        let mut db = Database::open(&name, Options::default()).unwrap();
        db.put(b"kept", b"value").unwrap();
    }

    // a crash between the content append and the page write leaves bytes
    // in the content file that no record points at
    let dat = DbPaths::new(&name).dat;
    let mut bytes = fs::read(&dat).unwrap();
    bytes.extend_from_slice(b"orphaned value");
    fs::write(&dat, &bytes).unwrap();

    let mut db = Database::open(&name, Options::default()).unwrap();
    assert_eq!(db.fetch(b"kept").unwrap(), Some(b"value".to_vec()));
    let stats = db.stats().unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.unreclaimed_bytes, 14);

    db.put(b"after", b"crash").unwrap();
    assert_eq!(db.fetch(b"after").unwrap(), Some(b"crash".to_vec()));
}

/// Test a split interrupted after the sibling page was written
#[test]
fn test_recovery_from_partial_split() {
    let dir = TempDir::new().unwrap();
    let name = create(&dir);

    // 150 short records fit in bucket 0 without a split
    let keys: Vec<Vec<u8>> = (0..150).map(|i| format!("key{:05}", i).into_bytes()).collect();
    {
        let mut db = Database::open(&name, Options::default()).unwrap();
        for key in &keys {
            db.put(key, b"v").unwrap();
        }
        assert_eq!(db.stats().unwrap().buckets, 1);
        db.close().unwrap();
    }

    // a stray sibling block with no split bit set is never consulted
    let pag = DbPaths::new(&name).pag;
    let file = OpenOptions::new().write(true).open(&pag).unwrap();
    file.set_len(2 * edbm::page::PAGE_SIZE as u64).unwrap();

    let mut db = Database::open(&name, Options::default()).unwrap();
    for key in &keys {
        assert!(db.seek(key).unwrap());
    }
    assert_eq!(db.entries().count(), keys.len());
}
