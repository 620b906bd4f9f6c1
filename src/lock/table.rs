//! In-process exclusion for record locks that belong to the process.
//!
//! Classic `fcntl` locks never conflict with other locks of the same
//! process, so two handles in one process would walk straight through each
//! other's page locks. Every lock is first recorded here, keyed by the
//! file's device and inode, and waits for conflicting holders of other
//! owners before it is requested from the kernel.
#![cfg_attr(target_os = "linux", allow(dead_code))]

use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use super::{LockMode, LockRange};

static TABLE: LockTable = LockTable::new();
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identifies a file independently of the descriptor it was opened through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn of(file: &File) -> io::Result<Self> {
        let meta = file.metadata()?;
        Ok(Self { dev: meta.dev(), ino: meta.ino() })
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    owner: u64,
    file: FileId,
    range: LockRange,
    mode: LockMode,
}

impl Held {
    fn overlaps(&self, file: FileId, range: &LockRange) -> bool {
        self.file == file && self.range.offset < range.end() && range.offset < self.range.end()
    }
}

/// Record locks held by this process, per owner.
#[derive(Debug)]
pub(crate) struct LockTable {
    held: Mutex<Vec<Held>>,
    released: Condvar,
}

impl LockTable {
    pub const fn new() -> Self {
        Self { held: parking_lot::const_mutex(Vec::new()), released: Condvar::new() }
    }

    /// The table shared by every handle in the process.
    pub fn global() -> &'static LockTable {
        &TABLE
    }

    /// A fresh owner id.
    pub fn new_owner() -> u64 {
        NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
    }

    /// Waits until no other owner holds a conflicting lock on an
    /// overlapping range, then records the lock. Locking a range the owner
    /// already holds converts it to `mode`.
    pub fn acquire(&self, owner: u64, file: FileId, range: LockRange, mode: LockMode) {
        let mut held = self.held.lock();
        loop {
            let conflict = held.iter().any(|h| {
                h.owner != owner
                    && h.overlaps(file, &range)
                    && (mode == LockMode::Exclusive || h.mode == LockMode::Exclusive)
            });
            if !conflict {
                break;
            }
            self.released.wait(&mut held);
        }

        match held
            .iter_mut()
            .find(|h| h.owner == owner && h.file == file && h.range == range)
        {
            Some(h) => h.mode = mode,
            None => held.push(Held { owner, file, range, mode }),
        }
    }

    /// Forgets the lock. `unlock` drops the kernel lock and runs with the
    /// table locked, and only if no holder is left on an overlapping range.
    pub fn release<F>(&self, owner: u64, file: FileId, range: LockRange, unlock: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<()>,
    {
        let mut held = self.held.lock();
        held.retain(|h| !(h.owner == owner && h.file == file && h.range == range));
        let result = if held.iter().any(|h| h.overlaps(file, &range)) {
            Ok(())
        } else {
            unlock()
        };
        self.released.notify_all();
        result
    }

    /// Drops every entry of `owner` without touching kernel locks.
    pub fn forget_owner(&self, owner: u64) {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|h| h.owner != owner);
        if held.len() != before {
            self.released.notify_all();
        }
    }

    #[cfg(test)]
    fn count(&self, owner: u64) -> usize {
        self.held.lock().iter().filter(|h| h.owner == owner).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Region;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const FILE: FileId = FileId { dev: 1, ino: 42 };

    fn block(n: u64) -> LockRange {
        LockRange::block(Region::Pages, n, 4096)
    }

    #[test]
    fn test_shared_holders_coexist() {
        let table = LockTable::new();
        table.acquire(1, FILE, block(0), LockMode::Shared);
        table.acquire(2, FILE, block(0), LockMode::Shared);
        assert_eq!(table.count(1), 1);
        assert_eq!(table.count(2), 1);
    }

    #[test]
    fn test_kernel_unlock_waits_for_last_holder() {
        let table = LockTable::new();
        table.acquire(1, FILE, block(0), LockMode::Shared);
        table.acquire(2, FILE, block(0), LockMode::Shared);

        let mut unlocked = 0;
        table
            .release(1, FILE, block(0), || {
                unlocked += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(unlocked, 0);
        table
            .release(2, FILE, block(0), || {
                unlocked += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(unlocked, 1);
    }

    #[test]
    fn test_conversion_keeps_one_entry() {
        let table = LockTable::new();
        table.acquire(1, FILE, block(3), LockMode::Shared);
        table.acquire(1, FILE, block(3), LockMode::Exclusive);
        assert_eq!(table.count(1), 1);
    }

    #[test]
    fn test_exclusive_waits_for_other_owner() {
        let table = Arc::new(LockTable::new());
        table.acquire(1, FILE, block(0), LockMode::Exclusive);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table.acquire(2, FILE, block(0), LockMode::Shared);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        // a different block or file is not affected
        table.acquire(3, FILE, block(1), LockMode::Exclusive);
        table.acquire(3, FileId { dev: 1, ino: 7 }, block(0), LockMode::Exclusive);

        table.release(1, FILE, block(0), || Ok(())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_whole_file_range_overlaps_every_block() {
        let table = Arc::new(LockTable::new());
        table.acquire(1, FILE, block(1000), LockMode::Shared);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table.acquire(2, FILE, LockRange::whole(Region::Pages), LockMode::Exclusive);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        table.forget_owner(1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_file_id_ignores_descriptor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.pag");
        std::fs::write(&path, b"").unwrap();
        let a = File::open(&path).unwrap();
        let b = File::open(&path).unwrap();
        assert_eq!(FileId::of(&a).unwrap(), FileId::of(&b).unwrap());
    }
}
