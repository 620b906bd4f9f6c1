//! Locking disciplines.
//!
//! A handle talks to its locker through [`Locker`] only; which discipline
//! sits behind it is chosen by [`LockStrategy`] when the database is opened.
//!
//! - [`ByteRangeLocker`]: POSIX record locks on exactly the directory block,
//!   page block or content range an operation touches.
//! - [`WholeFileLocker`]: one exclusive lock on the `.dir` file, taken at
//!   open and held until close.
//! - [`NoLocker`]: nothing at all.
//!
//! Byte-range locks are owned by the handle that took them, so separate
//! handles exclude each other whether they live in one process or in
//! several.

#[cfg(unix)]
mod byte_range;
mod none;
#[cfg(unix)]
mod table;
mod whole_file;

use std::fmt;
use std::fs::File;

#[cfg(unix)]
pub use byte_range::ByteRangeLocker;
pub use none::NoLocker;
pub use whole_file::WholeFileLocker;

use crate::config::LockStrategy;
use crate::error::{Error, Result};

/// Offset of the one-byte region that serialises appends to the content
/// file. Content addresses and lengths are 32-bit, so no value byte ever
/// lives here.
pub const APPEND_LOCK_OFFSET: u64 = u32::MAX as u64;

/// Shared or exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders, no exclusive holder.
    Shared,
    /// A single holder.
    Exclusive,
}

/// Which backing file a lock range lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The `.dir` split-bit file.
    Directory,
    /// The `.pag` page file.
    Pages,
    /// The `.dat` content file.
    Content,
}

/// A byte range of one backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    /// The file the range belongs to.
    pub region: Region,
    /// First byte.
    pub offset: u64,
    /// Number of bytes. Zero covers everything from `offset` on, however
    /// far the file grows.
    pub len: u64,
}

impl LockRange {
    /// The range covering block `block` of `size` bytes.
    pub fn block(region: Region, block: u64, size: usize) -> Self {
        Self { region, offset: block * size as u64, len: size as u64 }
    }

    /// The range covering a stored value, or `None` for an empty value.
    pub fn content(address: u32, length: u32) -> Option<Self> {
        (length > 0).then_some(Self {
            region: Region::Content,
            offset: address as u64,
            len: length as u64,
        })
    }

    /// The sentinel range held while appending to the content file.
    pub fn append_point() -> Self {
        Self { region: Region::Content, offset: APPEND_LOCK_OFFSET, len: 1 }
    }

    /// The whole of a file, including bytes it does not have yet.
    pub fn whole(region: Region) -> Self {
        Self { region, offset: 0, len: 0 }
    }

    /// One past the last byte covered.
    pub fn end(&self) -> u64 {
        if self.len == 0 {
            u64::MAX
        } else {
            self.offset.saturating_add(self.len)
        }
    }
}

impl fmt::Display for LockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            write!(f, "{:?} bytes {}..", self.region, self.offset)
        } else {
            write!(f, "{:?} bytes {}..{}", self.region, self.offset, self.end())
        }
    }
}

/// A locking discipline.
///
/// `lock`/`unlock` are called around every block access; disciplines that
/// lock coarser than a block treat them as no-ops. Every failure is
/// reported as `Error::Lock`; callers never proceed without the lock.
pub trait Locker: Send + fmt::Debug {
    /// The strategy this locker implements.
    fn strategy(&self) -> LockStrategy;

    /// Called once after the backing files are open.
    fn attach(&mut self, _dir: &File) -> Result<()> {
        Ok(())
    }

    /// Called once before the backing files are closed.
    fn detach(&mut self, _dir: &File) -> Result<()> {
        Ok(())
    }

    /// Blocks until `range` of `file` is locked in `mode`.
    fn lock(&mut self, file: &File, range: LockRange, mode: LockMode) -> Result<()>;

    /// Releases `range` of `file`.
    fn unlock(&mut self, file: &File, range: LockRange) -> Result<()>;

    /// True if no other process can touch the files while this handle is
    /// open, so cached blocks stay valid between operations.
    fn excludes_others(&self) -> bool {
        false
    }
}

/// Builds the locker for `strategy`.
pub fn for_strategy(strategy: LockStrategy) -> Result<Box<dyn Locker>> {
    match strategy {
        #[cfg(unix)]
        LockStrategy::ByteRange => Ok(Box::new(ByteRangeLocker::new())),
        #[cfg(not(unix))]
        LockStrategy::ByteRange => Err(Error::lock(
            "byte-range locking is not available on this platform",
        )),
        LockStrategy::WholeFile => Ok(Box::new(WholeFileLocker::new())),
        LockStrategy::None => Ok(Box::new(NoLocker)),
    }
}

pub(crate) fn lock_error(what: &str, range: LockRange, err: std::io::Error) -> Error {
    Error::lock(format!("{} {}: {}", what, range, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range() {
        let range = LockRange::block(Region::Pages, 3, 4096);
        assert_eq!(range.offset, 3 * 4096);
        assert_eq!(range.len, 4096);
    }

    #[test]
    fn test_empty_content_has_no_range() {
        assert!(LockRange::content(10, 0).is_none());
        let range = LockRange::content(10, 5).unwrap();
        assert_eq!((range.offset, range.len), (10, 5));
    }

    #[test]
    fn test_append_point_is_beyond_values() {
        let range = LockRange::append_point();
        assert!(range.offset >= u32::MAX as u64);
    }

    #[test]
    fn test_whole_range_covers_everything() {
        let range = LockRange::whole(Region::Directory);
        assert_eq!(range.offset, 0);
        assert_eq!(range.end(), u64::MAX);
        assert_eq!(range.to_string(), "Directory bytes 0..");
        assert_eq!(LockRange::block(Region::Pages, 1, 4096).to_string(), "Pages bytes 4096..8192");
    }

    #[test]
    fn test_for_strategy() {
        assert_eq!(
            for_strategy(LockStrategy::WholeFile).unwrap().strategy(),
            LockStrategy::WholeFile
        );
        assert_eq!(for_strategy(LockStrategy::None).unwrap().strategy(), LockStrategy::None);
        #[cfg(unix)]
        assert_eq!(
            for_strategy(LockStrategy::ByteRange).unwrap().strategy(),
            LockStrategy::ByteRange
        );
    }
}
