//! # edbm - A dbm-Style Persistent Hash Table
//!
//! edbm stores byte-string keys and values in three files that together form
//! a dynamically growing hash table in the tradition of V7 `dbm`. Buckets are
//! split on demand, so no reorganisation pass is ever needed, and values can
//! be as large as the content file's 32-bit addressing allows.
//!
//! ## Architecture
//!
//! - **Directory** (`name.dir`): a bit array recording which buckets have
//!   been split at which depth
//! - **Pages** (`name.pag`): one 4 KiB slotted page per bucket holding
//!   `(content address, content length, key)` records
//! - **Content** (`name.dat`): an append-only heap of value bytes
//! - **Locking**: POSIX byte-range locks, a whole-file lock, or none
//!
//! A [`Database`] handle has a cursor: [`Database::seek`] and
//! [`Database::next`] move it, [`Database::get`] and [`Database::delete`]
//! act on the record under it.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use edbm::{Database, Options};
//!
//! # fn main() -> Result<(), edbm::Error> {
//! // Create the backing files, then open them
//! edbm::truncate("./history")?;
//! let mut db = Database::open("./history", Options::default())?;
//!
//! // Write operations
//! db.put(b"<123@site>", b"news.admin 0001")?;
//! db.put(b"<124@site>", b"comp.lang.c 0042")?;
//!
//! // Read operations
//! if db.seek(b"<123@site>")? {
//!     println!("Found: {:?}", db.get()?);
//! }
//!
//! // Delete operations
//! if db.seek(b"<124@site>")? {
//!     db.delete()?;
//! }
//!
//! // Full scan
//! db.rewind();
//! while let Some(key) = db.next()? {
//!     println!("{:?}", key);
//! }
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod bucket;
pub mod config;
mod content;
pub mod datum;
mod directory;
pub mod error;
pub mod files;
pub mod hash;
pub mod iterator;
pub mod lock;
pub mod page;
pub mod shared;
pub mod stats;

// Re-exports
pub use config::{CorruptPagePolicy, LockStrategy, Options};
pub use datum::Datum;
pub use error::{Error, Result};
pub use files::{destroy, rename, truncate, DbPaths};
pub use iterator::Entries;
pub use shared::SharedDatabase;
pub use stats::DbStats;

use std::fmt;
use std::path::Path;

use content::ContentFile;
use directory::Directory;
use files::DbFiles;
use hash::{calc_hash, MAX_MASK};
use lock::{LockMode, LockRange, Locker, Region};
use page::{PageStore, MAX_RECORD_SIZE, RECORD_HEADER};

/// Lock order for `truncate`. Pages come first: a writer holding a page
/// lock may still need the directory to finish a split.
const TRUNCATE_ORDER: [Region; 3] = [Region::Pages, Region::Directory, Region::Content];

fn region_file<'a>(
    dir: &'a Directory,
    pages: &'a PageStore,
    content: &'a ContentFile,
    region: Region,
) -> &'a std::fs::File {
    match region {
        Region::Directory => dir.file(),
        Region::Pages => pages.file(),
        Region::Content => content.file(),
    }
}

/// The record under the cursor.
#[derive(Debug, Clone)]
struct Cursor {
    datum: Datum,
    /// False once the record has been deleted. The key still anchors `next`.
    live: bool,
}

impl Cursor {
    fn live(datum: Datum) -> Self {
        Self { datum, live: true }
    }
}

/// An open database.
///
/// The handle owns its three files, one cached directory block, one cached
/// page block and a cursor. Every operation is synchronous: when it returns,
/// its writes have been issued to the operating system.
///
/// # Thread Safety
///
/// All operations take `&mut self`. To use one handle from several threads,
/// wrap it in a [`SharedDatabase`].
pub struct Database {
    /// Paths of the backing files
    paths: DbPaths,

    /// Configuration options
    options: Options,

    /// True if opened without write access
    read_only: bool,

    /// Split-bit directory
    dir: Directory,

    /// Page file and the cached page
    pages: PageStore,

    /// Value heap
    content: ContentFile,

    /// Locking discipline
    locker: Box<dyn Locker>,

    /// Current record
    cursor: Option<Cursor>,

    closed: bool,
}

impl Database {
    /// Opens the database `name`, i.e. the files `name.dir`, `name.pag` and
    /// `name.dat`.
    ///
    /// The files must already exist; use [`truncate`] to create them. If the
    /// directory file is not writable the handle is opened read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any of the three files is missing or unreadable (`Error::NoDatabase`)
    /// - The options are invalid
    /// - The whole-file lock cannot be acquired
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use edbm::{Database, LockStrategy, Options};
    ///
    /// # fn main() -> Result<(), edbm::Error> {
    /// let options = Options::default().lock_strategy(LockStrategy::WholeFile);
    /// let db = Database::open("./aliases", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(name: P, options: Options) -> Result<Self> {
        options.validate()?;
        let paths = DbPaths::new(name);
        let files = DbFiles::open(&paths, options.read_only)?;

        let mut locker = lock::for_strategy(options.lock_strategy)?;
        let mut dir = Directory::new(files.dir, options.sync_writes)?;
        locker.attach(dir.file())?;
        // the files may have changed while we waited for the lock
        dir.refresh()?;

        log::info!(
            "Opened database {} ({:?} locking{})",
            paths.dir.with_extension("").display(),
            options.lock_strategy,
            if files.read_only { ", read-only" } else { "" }
        );

        Ok(Self {
            paths,
            read_only: files.read_only,
            pages: PageStore::new(files.pag, options.corrupt_page_policy, options.sync_writes),
            content: ContentFile::new(files.dat, options.sync_writes),
            dir,
            locker,
            options,
            cursor: None,
            closed: false,
        })
    }

    /// Moves the cursor to `key`.
    ///
    /// Returns `false` and leaves the cursor where it was if the key is not
    /// present.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.seek_with(key, false)
    }

    /// Like [`seek`](Self::seek), but leaves the key's page locked
    /// exclusively until the next `put`, `delete`, `unlock`, `close` or page
    /// load, whether or not the key was found.
    pub fn seek_for_update(&mut self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        self.seek_with(key, true)
    }

    fn seek_with(&mut self, key: &[u8], update: bool) -> Result<bool> {
        self.begin_op()?;
        let hash = calc_hash(key);
        if update {
            self.lock_for_update(hash)?;
        } else {
            self.load_bucket(hash)?;
        }

        let page = self.pages.page();
        let found = page.find(key).and_then(|i| page.get(i)).map(|e| e.to_datum());
        Ok(match found {
            Some(datum) => {
                self.cursor = Some(Cursor::live(datum));
                true
            }
            None => false,
        })
    }

    /// Inserts `key` with `value`, replacing any existing value.
    ///
    /// The value is always appended to the content file; a replaced value
    /// stays behind as unreachable bytes. The cursor moves to the new record.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The handle is read-only (`Error::ReadOnly`)
    /// - The key can never fit in a page (`Error::ItemTooLarge`)
    /// - The content file would outgrow 32-bit addresses (`Error::ContentOverflow`)
    /// - Splitting did not make room (`Error::SplitLimit`)
    ///
    /// A failed `put` may leave the key's index entry in either state;
    /// re-check with [`seek`](Self::seek).
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let size = key.len() + RECORD_HEADER;
        if size > MAX_RECORD_SIZE {
            return Err(Error::ItemTooLarge { size, max: MAX_RECORD_SIZE });
        }

        self.begin_op()?;
        let hash = calc_hash(key);
        let address = self.content.append(value, self.locker.as_mut())?;
        let datum = Datum::new(key, address, value.len() as u32);

        let stored = self.store(hash, &datum);
        let released = self.pages.release(self.locker.as_mut());
        stored?;
        released?;

        self.cursor = Some(Cursor::live(datum));
        Ok(())
    }

    /// Inserts the index record for `datum`, splitting its bucket as often
    /// as needed.
    fn store(&mut self, hash: u32, datum: &Datum) -> Result<()> {
        let mut splits = 0;
        loop {
            let (bucket, mask) = self.lock_for_update(hash)?;
            let page = self.pages.page_mut();
            if let Some(i) = page.find(&datum.key) {
                page.remove(i);
            }
            if page.insert(&datum.key, datum.address, datum.length).is_some() {
                return self.pages.write();
            }

            if mask >= MAX_MASK || splits >= self.options.split_retry_limit {
                log::warn!("bucket {} is full after {} splits", bucket, splits);
                return Err(Error::SplitLimit { bucket, mask });
            }
            self.split(bucket, mask)?;
            splits += 1;
        }
    }

    /// Splits the cached, exclusively held page of `bucket` at `mask`.
    fn split(&mut self, bucket: u64, mask: u64) -> Result<()> {
        let sibling = bucket::sibling(bucket, mask);
        let moved = bucket::split_page(self.pages.page_mut(), mask)?;
        log::debug!(
            "splitting bucket {} at mask {:#x}: {} stay, {} move to {}",
            bucket,
            mask,
            self.pages.page().len(),
            moved.len(),
            sibling
        );

        self.pages.write_other(sibling, &moved, self.locker.as_mut())?;
        self.dir.set(bucket::split_bit(bucket, mask), self.locker.as_mut())?;
        self.pages.write()
    }

    /// Returns the value of the current record.
    pub fn get(&mut self) -> Result<Vec<u8>> {
        let Self { cursor, content, locker, .. } = self;
        match cursor {
            Some(c) if c.live => content.read(&c.datum, locker.as_mut()),
            _ => Err(Error::NoCurrentRecord),
        }
    }

    /// Deletes the current record.
    ///
    /// Returns `false` if the record had already been removed by another
    /// handle. Either way the cursor no longer has a current record, but
    /// [`next`](Self::next) continues from where it was.
    pub fn delete(&mut self) -> Result<bool> {
        self.check_writable()?;
        let key = match &self.cursor {
            Some(c) if c.live => c.datum.key.clone(),
            _ => return Err(Error::NoCurrentRecord),
        };

        self.begin_op()?;
        let removed = self.remove_locked(&key);
        let released = self.pages.release(self.locker.as_mut());
        let found = removed?;
        released?;

        if let Some(c) = self.cursor.as_mut() {
            c.live = false;
        }
        Ok(found)
    }

    fn remove_locked(&mut self, key: &[u8]) -> Result<bool> {
        self.lock_for_update(calc_hash(key))?;
        let page = self.pages.page_mut();
        match page.find(key) {
            Some(i) => {
                page.remove(i);
                self.pages.write()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clears the cursor; the next call to [`next`](Self::next) starts over.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    /// Moves the cursor to the next record and returns its key, or `None`
    /// at the end of the table (the cursor then stays where it was).
    ///
    /// The order follows the bucket structure, not the keys. A pass from
    /// [`rewind`](Self::rewind) to `None` visits every key exactly once if
    /// nothing is modified in between.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        self.begin_op()?;
        let anchor = self.cursor.as_ref().map(|c| c.datum.key.clone());
        let found = match anchor {
            None => self.first_from(0)?,
            Some(key) => {
                let hash = calc_hash(&key);
                let (_, mask) = self.load_bucket(hash)?;
                match self.pages.page().successor(&key).map(|e| e.to_datum()) {
                    Some(datum) => Some(datum),
                    None => match bucket::next_bucket(hash as u64, mask) {
                        Some(next) => self.first_from(next)?,
                        None => None,
                    },
                }
            }
        };

        Ok(found.map(|datum| {
            let key = datum.key.clone();
            self.cursor = Some(Cursor::live(datum));
            key
        }))
    }

    /// The first record of the first non-empty bucket at or after `hash` in
    /// traversal order.
    fn first_from(&mut self, mut hash: u64) -> Result<Option<Datum>> {
        loop {
            let (_, mask) = self.load_bucket(hash as u32)?;
            if let Some(entry) = self.pages.page().first() {
                return Ok(Some(entry.to_datum()));
            }
            match bucket::next_bucket(hash, mask) {
                Some(next) => hash = next,
                None => return Ok(None),
            }
        }
    }

    /// Releases the page lock taken by [`seek_for_update`](Self::seek_for_update)
    /// without writing anything.
    pub fn unlock(&mut self) -> Result<()> {
        self.pages.release(self.locker.as_mut())
    }

    /// Empties all three files in place. The cursor is cleared.
    ///
    /// Each file is locked whole and exclusively while it is emptied, so
    /// other handles finish the operation they are in first and never see
    /// a half-truncated database.
    pub fn truncate(&mut self) -> Result<()> {
        self.check_writable()?;
        self.pages.release(self.locker.as_mut())?;

        let Self { dir, pages, content, locker, .. } = self;
        let mut locked = 0;
        let mut result = Ok(());
        for region in TRUNCATE_ORDER {
            let file = region_file(dir, pages, content, region);
            match locker.lock(file, LockRange::whole(region), LockMode::Exclusive) {
                Ok(()) => locked += 1,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = dir
                .truncate()
                .and_then(|_| pages.truncate())
                .and_then(|_| content.truncate());
        }
        for &region in TRUNCATE_ORDER[..locked].iter().rev() {
            let file = region_file(dir, pages, content, region);
            let unlocked = locker.unlock(file, LockRange::whole(region));
            if result.is_ok() {
                result = unlocked;
            }
        }
        result?;

        self.cursor = None;
        log::info!("Truncated database {}", self.paths.dir.display());
        Ok(())
    }

    /// Closes the handle, releasing its locks.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let released = self.pages.release(self.locker.as_mut());
        let detached = self.locker.detach(self.dir.file());
        released?;
        detached?;
        log::info!("Database closed successfully");
        Ok(())
    }

    /// Key of the current record.
    pub fn key(&self) -> Option<&[u8]> {
        self.current().map(|d| d.key.as_slice())
    }

    /// The current record: key, content address and content length.
    pub fn current(&self) -> Option<&Datum> {
        match &self.cursor {
            Some(c) if c.live => Some(&c.datum),
            _ => None,
        }
    }

    /// Looks up `key` and returns its value. Moves the cursor on a hit.
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.seek(key)? {
            self.get().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Deletes `key`. Returns `false` if it was not present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        if !self.seek_for_update(key)? {
            self.unlock()?;
            return Ok(false);
        }
        self.delete()
    }

    /// True if the handle cannot modify the database.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Paths of the backing files.
    pub fn paths(&self) -> &DbPaths {
        &self.paths
    }

    /// The options the handle was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Number of page blocks this handle found corrupt so far.
    pub fn corrupt_pages_detected(&self) -> u64 {
        self.pages.corrupt_pages()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Drops cached blocks that another process may have changed.
    fn begin_op(&mut self) -> Result<()> {
        if !self.locker.excludes_others() {
            self.dir.refresh()?;
            self.pages.invalidate();
        }
        Ok(())
    }

    fn resolve(&mut self, hash: u32) -> Result<(u64, u64)> {
        let Self { dir, locker, .. } = self;
        bucket::resolve(hash, |bit| dir.get(bit, locker.as_mut()))
    }

    /// Resolves `hash` and reads its page under a transient shared lock.
    fn load_bucket(&mut self, hash: u32) -> Result<(u64, u64)> {
        let (bucket, mask) = self.resolve(hash)?;
        self.pages.load(bucket, LockMode::Shared, false, self.locker.as_mut())?;
        Ok((bucket, mask))
    }

    /// Resolves `hash` and holds its page exclusively.
    ///
    /// Another process may split the bucket between the directory walk and
    /// the page lock; the split bit is checked again under the lock.
    fn lock_for_update(&mut self, hash: u32) -> Result<(u64, u64)> {
        loop {
            let (bucket, mask) = self.resolve(hash)?;
            self.pages.load(bucket, LockMode::Exclusive, true, self.locker.as_mut())?;
            if mask >= MAX_MASK || self.locker.excludes_others() {
                return Ok((bucket, mask));
            }
            self.dir.refresh()?;
            if !self.dir.get(bucket::split_bit(bucket, mask), self.locker.as_mut())? {
                return Ok((bucket, mask));
            }
            log::debug!("bucket {} was split while waiting for its lock, retrying", bucket);
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("paths", &self.paths)
            .field("read_only", &self.read_only)
            .field("lock_strategy", &self.locker.strategy())
            .field("current", &self.current().map(|d| String::from_utf8_lossy(&d.key)))
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Error closing database {}: {}", self.paths.dir.display(), e);
        }
    }
}
