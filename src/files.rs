//! The three backing files and whole-database file operations.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Suffix of the split-bit directory file.
pub const DIR_SUFFIX: &str = ".dir";
/// Suffix of the page file.
pub const PAG_SUFFIX: &str = ".pag";
/// Suffix of the content file.
pub const DAT_SUFFIX: &str = ".dat";

/// Paths of the files that make up the database `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPaths {
    /// `name.dir`
    pub dir: PathBuf,
    /// `name.pag`
    pub pag: PathBuf,
    /// `name.dat`
    pub dat: PathBuf,
}

impl DbPaths {
    /// Derives the three paths by appending the suffixes to `name`.
    pub fn new<P: AsRef<Path>>(name: P) -> Self {
        let name = name.as_ref();
        Self {
            dir: with_suffix(name, DIR_SUFFIX),
            pag: with_suffix(name, PAG_SUFFIX),
            dat: with_suffix(name, DAT_SUFFIX),
        }
    }

    /// The paths in directory, page, content order.
    pub fn all(&self) -> [&Path; 3] {
        [&self.dir, &self.pag, &self.dat]
    }

    /// True if all three files exist.
    pub fn exist(&self) -> bool {
        self.all().iter().all(|p| p.is_file())
    }
}

fn with_suffix(name: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(name.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

/// The open backing files.
#[derive(Debug)]
pub(crate) struct DbFiles {
    pub dir: File,
    pub pag: File,
    pub dat: File,
    pub read_only: bool,
}

impl DbFiles {
    /// Opens all three files read-write, or read-only if `read_only` is set
    /// or the directory file cannot be opened for writing.
    pub fn open(paths: &DbPaths, read_only: bool) -> Result<Self> {
        let (dir, read_only) = if read_only {
            (open_existing(&paths.dir, false)?, true)
        } else {
            match open_existing(&paths.dir, true) {
                Ok(file) => (file, false),
                Err(Error::NoDatabase { source, .. })
                    if source.kind() == io::ErrorKind::PermissionDenied =>
                {
                    log::info!("{} is not writable, opening read-only", paths.dir.display());
                    (open_existing(&paths.dir, false)?, true)
                }
                Err(e) => return Err(e),
            }
        };
        let pag = open_existing(&paths.pag, !read_only)?;
        let dat = open_existing(&paths.dat, !read_only)?;
        Ok(Self { dir, pag, dat, read_only })
    }
}

fn open_existing(path: &Path, write: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .open(path)
        .map_err(|source| Error::NoDatabase { path: path.to_path_buf(), source })
}

/// Creates the database `name`, or empties it if it already exists.
///
/// No locks are taken. To empty a database other handles may have open,
/// use [`Database::truncate`](crate::Database::truncate).
pub fn truncate<P: AsRef<Path>>(name: P) -> Result<()> {
    let paths = DbPaths::new(name);
    for path in paths.all() {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
    }
    log::info!("truncated database at {}", paths.dir.display());
    Ok(())
}

/// Renames all three files of `from` to the corresponding names of `to`.
///
/// Stops at the first failure; files already renamed stay renamed.
pub fn rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<()> {
    let from = DbPaths::new(from);
    let to = DbPaths::new(to);
    for (src, dst) in from.all().into_iter().zip(to.all()) {
        fs::rename(src, dst).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::NoDatabase { path: src.to_path_buf(), source },
            _ => Error::Io(source),
        })?;
    }
    Ok(())
}

/// Removes all three files of `name`. Files that are already gone are skipped.
pub fn destroy<P: AsRef<Path>>(name: P) -> Result<()> {
    let paths = DbPaths::new(name);
    for path in paths.all() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads block `block` of `buf.len()` bytes. Bytes past the end of the file
/// read as zero. Returns how many bytes actually came from the file.
pub(crate) fn read_block(file: &File, block: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut f = file;
    f.seek(SeekFrom::Start(block * buf.len() as u64))?;
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf[filled..].fill(0);
    Ok(filled)
}

/// Writes `buf` as block `block` in a single write.
pub(crate) fn write_block(file: &File, block: u64, buf: &[u8], sync: bool) -> io::Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(block * buf.len() as u64))?;
    f.write_all(buf)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_append_suffix() {
        let paths = DbPaths::new("/var/news/history.v2");
        assert_eq!(paths.dir, PathBuf::from("/var/news/history.v2.dir"));
        assert_eq!(paths.pag, PathBuf::from("/var/news/history.v2.pag"));
        assert_eq!(paths.dat, PathBuf::from("/var/news/history.v2.dat"));
    }

    #[test]
    fn test_truncate_creates_and_empties() {
        let dir = TempDir::new().unwrap();
        let name = dir.path().join("db");
        truncate(&name).unwrap();

        let paths = DbPaths::new(&name);
        assert!(paths.exist());
        fs::write(&paths.dat, b"payload").unwrap();

        truncate(&name).unwrap();
        assert_eq!(fs::metadata(&paths.dat).unwrap().len(), 0);
    }

    #[test]
    fn test_rename_moves_all_three() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("old");
        let to = dir.path().join("new");
        truncate(&from).unwrap();

        rename(&from, &to).unwrap();
        assert!(!DbPaths::new(&from).dir.exists());
        assert!(DbPaths::new(&to).exist());
    }

    #[test]
    fn test_rename_missing_database() {
        let dir = TempDir::new().unwrap();
        let err = rename(dir.path().join("nope"), dir.path().join("other")).unwrap_err();
        assert!(matches!(err, Error::NoDatabase { .. }));
    }

    #[test]
    fn test_open_missing_database() {
        let dir = TempDir::new().unwrap();
        let err = DbFiles::open(&DbPaths::new(dir.path().join("nope")), false).unwrap_err();
        assert!(matches!(err, Error::NoDatabase { .. }));
    }

    #[test]
    fn test_block_io_zero_fills_past_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        write_block(&file, 1, &[7u8; 16], false).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);

        let mut buf = [1u8; 16];
        assert_eq!(read_block(&file, 0, &mut buf).unwrap(), 16);
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(read_block(&file, 1, &mut buf).unwrap(), 16);
        assert_eq!(buf, [7u8; 16]);

        let mut buf = [1u8; 16];
        assert_eq!(read_block(&file, 5, &mut buf).unwrap(), 0);
        assert_eq!(buf, [0u8; 16]);
    }
}
