use std::fs::File;

use super::{Page, PAGE_SIZE};
use crate::config::CorruptPagePolicy;
use crate::error::{Error, Result};
use crate::files::{read_block, write_block};
use crate::lock::{LockMode, LockRange, Locker, Region};

/// The `.pag` file plus the one page block a handle keeps in memory.
///
/// A block lock taken with `hold` stays until `release` or until a
/// different bucket is loaded.
#[derive(Debug)]
pub(crate) struct PageStore {
    file: File,
    page: Page,
    bucket: Option<u64>,
    held: Option<(u64, LockMode)>,
    policy: CorruptPagePolicy,
    sync: bool,
    corrupt_pages: u64,
}

fn block_range(bucket: u64) -> LockRange {
    LockRange::block(Region::Pages, bucket, PAGE_SIZE)
}

impl PageStore {
    pub fn new(file: File, policy: CorruptPagePolicy, sync: bool) -> Self {
        Self {
            file,
            page: Page::new(),
            bucket: None,
            held: None,
            policy,
            sync,
            corrupt_pages: 0,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// The cached page. Only meaningful after a successful `load`.
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn holds_exclusive(&self, bucket: u64) -> bool {
        self.held == Some((bucket, LockMode::Exclusive))
    }

    pub fn corrupt_pages(&self) -> u64 {
        self.corrupt_pages
    }

    /// Forgets the cached block unless its lock is still held.
    pub fn invalidate(&mut self) {
        if self.held.is_none() {
            self.bucket = None;
        }
    }

    /// Makes `bucket` the cached page, reading it under a `mode` lock.
    /// Without `hold` the lock is dropped again once the block is in memory.
    pub fn load(
        &mut self,
        bucket: u64,
        mode: LockMode,
        hold: bool,
        locker: &mut dyn Locker,
    ) -> Result<()> {
        let cached = self.bucket == Some(bucket);
        if let Some((held, held_mode)) = self.held {
            if held == bucket
                && cached
                && (held_mode == LockMode::Exclusive || mode == LockMode::Shared)
            {
                return Ok(());
            }
            self.release(locker)?;
        }

        let range = block_range(bucket);
        if cached && (!hold || locker.excludes_others()) {
            if hold {
                locker.lock(&self.file, range, mode)?;
                self.held = Some((bucket, mode));
            }
            return Ok(());
        }

        locker.lock(&self.file, range, mode)?;
        let read = self.read(bucket);
        if read.is_err() || !hold {
            let unlocked = locker.unlock(&self.file, range);
            read?;
            unlocked?;
        } else {
            self.held = Some((bucket, mode));
        }
        Ok(())
    }

    fn read(&mut self, bucket: u64) -> Result<()> {
        self.bucket = None;
        let mut buf = [0u8; PAGE_SIZE];
        read_block(&self.file, bucket, &mut buf)?;
        self.page = match Page::decode(&buf) {
            Some(page) => page,
            None => match self.policy {
                CorruptPagePolicy::Zero => {
                    log::warn!("page block {} failed its slot check, treating it as empty", bucket);
                    self.corrupt_pages += 1;
                    Page::new()
                }
                CorruptPagePolicy::Fail => {
                    self.corrupt_pages += 1;
                    return Err(Error::corruption(format!(
                        "page block {} failed its slot check",
                        bucket
                    )));
                }
            },
        };
        self.bucket = Some(bucket);
        Ok(())
    }

    /// Writes the cached page back. The block must be held exclusively.
    pub fn write(&mut self) -> Result<()> {
        let bucket = match self.bucket {
            Some(bucket) if self.holds_exclusive(bucket) => bucket,
            _ => return Err(Error::lock("page write without an exclusive block lock")),
        };
        write_block(&self.file, bucket, self.page.as_bytes(), self.sync)?;
        Ok(())
    }

    /// Writes `page` as block `bucket`, locking it for the duration.
    pub fn write_other(&mut self, bucket: u64, page: &Page, locker: &mut dyn Locker) -> Result<()> {
        let range = block_range(bucket);
        locker.lock(&self.file, range, LockMode::Exclusive)?;
        let written = write_block(&self.file, bucket, page.as_bytes(), self.sync);
        let unlocked = locker.unlock(&self.file, range);
        written?;
        unlocked?;
        if self.bucket == Some(bucket) {
            self.bucket = None;
        }
        Ok(())
    }

    /// Drops the held block lock, if any.
    pub fn release(&mut self, locker: &mut dyn Locker) -> Result<()> {
        match self.held.take() {
            Some((bucket, _)) => locker.unlock(&self.file, block_range(bucket)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.bucket = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NoLocker;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn store(dir: &TempDir, policy: CorruptPagePolicy) -> PageStore {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("db.pag"))
            .unwrap();
        PageStore::new(file, policy, false)
    }

    #[test]
    fn test_missing_block_loads_empty() {
        let dir = TempDir::new().unwrap();
        let mut pages = store(&dir, CorruptPagePolicy::Fail);
        let mut locker = NoLocker;

        pages.load(9, LockMode::Shared, false, &mut locker).unwrap();
        assert_eq!(pages.bucket, Some(9));
        assert!(pages.page().is_empty());
    }

    #[test]
    fn test_write_requires_exclusive_hold() {
        let dir = TempDir::new().unwrap();
        let mut pages = store(&dir, CorruptPagePolicy::Fail);
        let mut locker = NoLocker;

        pages.load(0, LockMode::Shared, false, &mut locker).unwrap();
        assert!(matches!(pages.write(), Err(Error::Lock(_))));

        pages.load(0, LockMode::Exclusive, true, &mut locker).unwrap();
        pages.page_mut().insert(b"key", 0, 3).unwrap();
        pages.write().unwrap();
        pages.release(&mut locker).unwrap();

        pages.invalidate();
        pages.load(0, LockMode::Shared, false, &mut locker).unwrap();
        assert!(pages.page().find(b"key").is_some());
    }

    #[test]
    fn test_write_other_block() {
        let dir = TempDir::new().unwrap();
        let mut pages = store(&dir, CorruptPagePolicy::Fail);
        let mut locker = NoLocker;

        let mut page = Page::new();
        page.insert(b"moved", 4, 2).unwrap();
        pages.write_other(3, &page, &mut locker).unwrap();
        assert_eq!(pages.len().unwrap(), 4 * PAGE_SIZE as u64);

        pages.load(3, LockMode::Shared, false, &mut locker).unwrap();
        assert_eq!(pages.page().get(0).unwrap().key, b"moved");
    }

    #[test]
    fn test_corrupt_block_policies() {
        let dir = TempDir::new().unwrap();
        let mut pages = store(&dir, CorruptPagePolicy::Zero);
        let mut locker = NoLocker;

        // record count of 1 with a slot pointing into the slot table
        let mut block = [0u8; PAGE_SIZE];
        block[0] = 1;
        block[2] = 2;
        write_block(&pages.file, 0, &block, false).unwrap();

        pages.load(0, LockMode::Shared, false, &mut locker).unwrap();
        assert!(pages.page().is_empty());
        assert_eq!(pages.corrupt_pages(), 1);

        let file = pages.file.try_clone().unwrap();
        let mut strict = PageStore::new(file, CorruptPagePolicy::Fail, false);
        let err = strict.load(0, LockMode::Shared, false, &mut locker).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
        assert_eq!(strict.bucket, None);
    }
}
