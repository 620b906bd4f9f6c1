//! The split-bit directory (`.dir` file).
//!
//! Bit `n` lives in byte `n / 8`, bit position `n % 8`, and is read and
//! written one 4 KiB block at a time. Bits beyond the end of the file are
//! zero.

use std::fs::File;

use crate::error::Result;
use crate::files::{read_block, write_block};
use crate::lock::{LockMode, LockRange, Locker, Region};

/// Size of a directory block in bytes.
pub const DIR_BLOCK_SIZE: usize = 4096;

const BITS_PER_BLOCK: u64 = DIR_BLOCK_SIZE as u64 * 8;

fn locate(bit: u64) -> (u64, usize, u8) {
    let block = bit / BITS_PER_BLOCK;
    let within = bit % BITS_PER_BLOCK;
    (block, (within / 8) as usize, 1 << (within % 8))
}

fn block_range(block: u64) -> LockRange {
    LockRange::block(Region::Directory, block, DIR_BLOCK_SIZE)
}

#[derive(Debug)]
pub(crate) struct Directory {
    file: File,
    block: Box<[u8; DIR_BLOCK_SIZE]>,
    cached: Option<u64>,
    bit_limit: u64,
    sync: bool,
}

impl Directory {
    pub fn new(file: File, sync: bool) -> Result<Self> {
        let mut dir = Self {
            file,
            block: Box::new([0u8; DIR_BLOCK_SIZE]),
            cached: None,
            bit_limit: 0,
            sync,
        };
        dir.refresh()?;
        Ok(dir)
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Drops the cached block and re-reads the file size.
    pub fn refresh(&mut self) -> Result<()> {
        self.cached = None;
        self.bit_limit = self.len()? * 8;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reads directory bit `bit`.
    pub fn get(&mut self, bit: u64, locker: &mut dyn Locker) -> Result<bool> {
        if bit >= self.bit_limit {
            return Ok(false);
        }
        let (block, byte, mask) = locate(bit);
        if self.cached != Some(block) {
            self.load(block, locker)?;
        }
        Ok(self.block[byte] & mask != 0)
    }

    fn load(&mut self, block: u64, locker: &mut dyn Locker) -> Result<()> {
        self.cached = None;
        let range = block_range(block);
        locker.lock(&self.file, range, LockMode::Shared)?;
        let read = read_block(&self.file, block, &mut self.block[..]);
        let unlocked = locker.unlock(&self.file, range);
        read?;
        unlocked?;
        self.cached = Some(block);
        Ok(())
    }

    /// Sets directory bit `bit`, extending the file if needed.
    ///
    /// The block is re-read under an exclusive lock so bits set by other
    /// handles since it was cached are preserved.
    pub fn set(&mut self, bit: u64, locker: &mut dyn Locker) -> Result<()> {
        let (block, byte, mask) = locate(bit);
        let range = block_range(block);
        self.cached = None;

        locker.lock(&self.file, range, LockMode::Exclusive)?;
        let written = self.set_locked(block, byte, mask);
        let unlocked = locker.unlock(&self.file, range);
        written?;
        unlocked?;

        self.cached = Some(block);
        self.bit_limit = self.bit_limit.max((block + 1) * BITS_PER_BLOCK);
        Ok(())
    }

    fn set_locked(&mut self, block: u64, byte: usize, mask: u8) -> Result<()> {
        read_block(&self.file, block, &mut self.block[..])?;
        self.block[byte] |= mask;
        write_block(&self.file, block, &self.block[..], self.sync)?;
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.cached = None;
        self.bit_limit = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NoLocker;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.path().join("db.dir"))
            .unwrap()
    }

    #[test]
    fn test_locate() {
        assert_eq!(locate(0), (0, 0, 1));
        assert_eq!(locate(9), (0, 1, 2));
        assert_eq!(locate(BITS_PER_BLOCK + 7), (1, 0, 0x80));
    }

    #[test]
    fn test_empty_directory_reads_zero() {
        let tmp = TempDir::new().unwrap();
        let mut dir = Directory::new(open(&tmp), false).unwrap();
        let mut locker = NoLocker;
        assert!(!dir.get(0, &mut locker).unwrap());
        assert!(!dir.get(1 << 31, &mut locker).unwrap());
    }

    #[test]
    fn test_set_extends_file_by_whole_blocks() {
        let tmp = TempDir::new().unwrap();
        let mut dir = Directory::new(open(&tmp), false).unwrap();
        let mut locker = NoLocker;

        dir.set(BITS_PER_BLOCK + 3, &mut locker).unwrap();
        assert_eq!(dir.len().unwrap(), 2 * DIR_BLOCK_SIZE as u64);
        assert!(dir.get(BITS_PER_BLOCK + 3, &mut locker).unwrap());
        assert!(!dir.get(BITS_PER_BLOCK + 2, &mut locker).unwrap());
        assert!(!dir.get(3, &mut locker).unwrap());
    }

    #[test]
    fn test_set_preserves_bits_from_other_handles() {
        let tmp = TempDir::new().unwrap();
        let mut first = Directory::new(open(&tmp), false).unwrap();
        let mut second = Directory::new(open(&tmp), false).unwrap();
        let mut locker = NoLocker;

        first.set(1, &mut locker).unwrap();
        assert!(!second.get(1, &mut locker).unwrap());

        // second still has the stale, pre-extension view
        second.set(2, &mut locker).unwrap();
        assert!(second.get(1, &mut locker).unwrap());

        first.refresh().unwrap();
        assert!(first.get(1, &mut locker).unwrap());
        assert!(first.get(2, &mut locker).unwrap());
    }

    #[test]
    fn test_truncate_clears_bits() {
        let tmp = TempDir::new().unwrap();
        let mut dir = Directory::new(open(&tmp), false).unwrap();
        let mut locker = NoLocker;

        dir.set(5, &mut locker).unwrap();
        dir.truncate().unwrap();
        assert!(!dir.get(5, &mut locker).unwrap());
        assert_eq!(dir.len().unwrap(), 0);
    }
}
