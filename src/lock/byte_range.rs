//! Record locks through `fcntl`.
//!
//! On Linux these are open file description locks (`F_OFD_SETLKW`). They
//! belong to the descriptor, so every handle excludes every other one,
//! including handles opened by the same process, and closing one handle
//! never drops the locks of another.
//!
//! Other unix targets only have process-owned locks (`F_SETLKW`). There the
//! kernel lock excludes other processes and the process-wide
//! [`LockTable`] excludes handles of this process from each other. Closing
//! any descriptor of a file still drops all of this process's kernel locks
//! on it, so handles sharing a database in one process should not be
//! closed while another one is mid-operation.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use super::{lock_error, LockMode, LockRange, Locker};
use crate::config::LockStrategy;
use crate::error::Result;
#[cfg(not(target_os = "linux"))]
use super::table::{FileId, LockTable};

#[cfg(target_os = "linux")]
const SET_LOCK_WAIT: libc::c_int = libc::F_OFD_SETLKW;
#[cfg(not(target_os = "linux"))]
const SET_LOCK_WAIT: libc::c_int = libc::F_SETLKW;

/// Locks exactly the ranges it is asked for, waiting as long as it takes.
#[derive(Debug)]
pub struct ByteRangeLocker {
    held: usize,
    #[cfg(not(target_os = "linux"))]
    owner: u64,
}

impl Default for ByteRangeLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteRangeLocker {
    /// Creates a new locker.
    pub fn new() -> Self {
        Self {
            held: 0,
            #[cfg(not(target_os = "linux"))]
            owner: LockTable::new_owner(),
        }
    }

    /// Number of ranges currently locked through this locker.
    pub fn held(&self) -> usize {
        self.held
    }

    #[cfg(target_os = "linux")]
    fn acquire(
        &mut self,
        file: &File,
        range: LockRange,
        _mode: LockMode,
        kind: libc::c_short,
    ) -> io::Result<()> {
        set_lock(file, kind, range)
    }

    #[cfg(target_os = "linux")]
    fn release(&mut self, file: &File, range: LockRange) -> io::Result<()> {
        set_lock(file, libc::F_UNLCK as libc::c_short, range)
    }

    #[cfg(not(target_os = "linux"))]
    fn acquire(
        &mut self,
        file: &File,
        range: LockRange,
        mode: LockMode,
        kind: libc::c_short,
    ) -> io::Result<()> {
        let id = FileId::of(file)?;
        let table = LockTable::global();
        table.acquire(self.owner, id, range, mode);
        set_lock(file, kind, range).or_else(|e| {
            // the kernel lock was never granted, so there is nothing to drop
            let _ = table.release(self.owner, id, range, || Ok(()));
            Err(e)
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn release(&mut self, file: &File, range: LockRange) -> io::Result<()> {
        let id = FileId::of(file)?;
        LockTable::global().release(self.owner, id, range, || {
            set_lock(file, libc::F_UNLCK as libc::c_short, range)
        })
    }
}

#[cfg(not(target_os = "linux"))]
impl Drop for ByteRangeLocker {
    fn drop(&mut self) {
        LockTable::global().forget_owner(self.owner);
    }
}

impl Locker for ByteRangeLocker {
    fn strategy(&self) -> LockStrategy {
        LockStrategy::ByteRange
    }

    fn lock(&mut self, file: &File, range: LockRange, mode: LockMode) -> Result<()> {
        let kind = match mode {
            LockMode::Shared => libc::F_RDLCK,
            LockMode::Exclusive => libc::F_WRLCK,
        };
        self.acquire(file, range, mode, kind as libc::c_short)
            .map_err(|e| lock_error("lock", range, e))?;
        self.held += 1;
        log::trace!("locked {} {:?}", range, mode);
        Ok(())
    }

    fn unlock(&mut self, file: &File, range: LockRange) -> Result<()> {
        self.release(file, range).map_err(|e| lock_error("unlock", range, e))?;
        self.held = self.held.saturating_sub(1);
        Ok(())
    }
}

fn set_lock(file: &File, kind: libc::c_short, range: LockRange) -> io::Result<()> {
    let start = libc::off_t::try_from(range.offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lock offset out of range"))?;
    let len = libc::off_t::try_from(range.len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lock length out of range"))?;

    // SAFETY: flock is a plain C struct; all-zero is a valid value, and
    // open file description locks require l_pid to be zero.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = kind;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = start;
    fl.l_len = len;

    loop {
        // SAFETY: the descriptor is owned by `file` and `fl` outlives the call.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), SET_LOCK_WAIT, &fl as *const libc::flock) };
        if rc != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
