//! One exclusive lock for the lifetime of the handle.

use std::fs::File;

use super::{LockMode, LockRange, Locker};
use crate::config::LockStrategy;
use crate::error::{Error, Result};

/// Takes an exclusive advisory lock on the `.dir` file at open and keeps it
/// until close. Every other handle, in this process or another, waits in
/// `open` until then.
#[derive(Debug, Default)]
pub struct WholeFileLocker {
    attached: bool,
}

impl WholeFileLocker {
    /// Creates a new locker.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for WholeFileLocker {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::WholeFile
    }

    fn attach(&mut self, dir: &File) -> Result<()> {
        fs2::FileExt::lock_exclusive(dir)
            .map_err(|e| Error::lock(format!("whole-file lock: {}", e)))?;
        self.attached = true;
        log::debug!("acquired whole-file lock");
        Ok(())
    }

    fn detach(&mut self, dir: &File) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        fs2::FileExt::unlock(dir).map_err(|e| Error::lock(format!("whole-file unlock: {}", e)))
    }

    fn lock(&mut self, _file: &File, _range: LockRange, _mode: LockMode) -> Result<()> {
        Ok(())
    }

    fn unlock(&mut self, _file: &File, _range: LockRange) -> Result<()> {
        Ok(())
    }

    fn excludes_others(&self) -> bool {
        self.attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_descriptor_is_excluded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.dir");
        std::fs::write(&path, b"").unwrap();

        let first = File::open(&path).unwrap();
        let second = File::open(&path).unwrap();

        let mut locker = WholeFileLocker::new();
        locker.attach(&first).unwrap();
        assert!(locker.excludes_others());
        assert!(fs2::FileExt::try_lock_exclusive(&second).is_err());

        locker.detach(&first).unwrap();
        assert!(!locker.excludes_others());
        fs2::FileExt::try_lock_exclusive(&second).unwrap();
    }

    #[test]
    fn test_detach_without_attach() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.dir");
        std::fs::write(&path, b"").unwrap();
        let file = File::open(&path).unwrap();

        let mut locker = WholeFileLocker::new();
        locker.detach(&file).unwrap();
    }
}
