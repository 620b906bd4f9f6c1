//! The append-only content file (`.dat`).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::lock::{LockMode, LockRange, Locker};

/// Values are appended at the end and never moved or reclaimed.
/// Replaced and deleted values stay behind as unreachable bytes.
#[derive(Debug)]
pub(crate) struct ContentFile {
    file: File,
    sync: bool,
}

impl ContentFile {
    pub fn new(file: File, sync: bool) -> Self {
        Self { file, sync }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Appends `value` and returns its address.
    pub fn append(&mut self, value: &[u8], locker: &mut dyn Locker) -> Result<u32> {
        let range = LockRange::append_point();
        locker.lock(&self.file, range, LockMode::Exclusive)?;
        let appended = self.append_locked(value);
        let unlocked = locker.unlock(&self.file, range);
        let address = appended?;
        unlocked?;
        Ok(address)
    }

    fn append_locked(&mut self, value: &[u8]) -> Result<u32> {
        let mut f = &self.file;
        let end = f.seek(SeekFrom::End(0))?;
        let new_end = end + value.len() as u64;
        if new_end > u32::MAX as u64 {
            return Err(Error::ContentOverflow { size: new_end });
        }
        f.write_all(value)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(end as u32)
    }

    /// Reads the value `datum` points at.
    pub fn read(&mut self, datum: &Datum, locker: &mut dyn Locker) -> Result<Vec<u8>> {
        let Some(range) = LockRange::content(datum.address, datum.length) else {
            return Ok(Vec::new());
        };
        locker.lock(&self.file, range, LockMode::Shared)?;
        let read = self.read_locked(datum);
        let unlocked = locker.unlock(&self.file, range);
        let value = read?;
        unlocked?;
        Ok(value)
    }

    fn read_locked(&self, datum: &Datum) -> Result<Vec<u8>> {
        let mut f = &self.file;
        f.seek(SeekFrom::Start(datum.address as u64))?;
        let mut value = vec![0u8; datum.length as usize];
        f.read_exact(&mut value).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::corruption(format!(
                "value at {} of length {} runs past the end of the content file",
                datum.address, datum.length
            )),
            _ => Error::Io(e),
        })?;
        Ok(value)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NoLocker;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn content(dir: &TempDir) -> ContentFile {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("db.dat"))
            .unwrap();
        ContentFile::new(file, false)
    }

    #[test]
    fn test_append_returns_consecutive_addresses() {
        let dir = TempDir::new().unwrap();
        let mut dat = content(&dir);
        let mut locker = NoLocker;

        assert_eq!(dat.append(b"hello", &mut locker).unwrap(), 0);
        assert_eq!(dat.append(b"", &mut locker).unwrap(), 5);
        assert_eq!(dat.append(b"world", &mut locker).unwrap(), 5);
        assert_eq!(dat.len().unwrap(), 10);

        let value = dat.read(&Datum::new("k", 5, 5), &mut locker).unwrap();
        assert_eq!(value, b"world");
        assert!(dat.read(&Datum::new("k", 5, 0), &mut locker).unwrap().is_empty());
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut dat = content(&dir);
        let mut locker = NoLocker;
        dat.append(b"abc", &mut locker).unwrap();

        let err = dat.read(&Datum::new("k", 1, 10), &mut locker).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_append_past_address_space() {
        let dir = TempDir::new().unwrap();
        let mut dat = content(&dir);
        let mut locker = NoLocker;

        // sparse file just short of the 32-bit limit
        dat.file.set_len(u32::MAX as u64 - 2).unwrap();
        let err = dat.append(b"four", &mut locker).unwrap_err();
        assert!(matches!(err, Error::ContentOverflow { .. }));
        assert_eq!(dat.len().unwrap(), u32::MAX as u64 - 2);

        assert_eq!(dat.append(b"ok", &mut locker).unwrap(), u32::MAX - 2);
    }
}
