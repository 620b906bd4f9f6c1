//! A database handle shared between threads.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Database, Options, Result};

/// A cloneable, thread-safe wrapper around one [`Database`].
///
/// Each method locks the handle for the duration of one keyed operation, so
/// the cursor is never observed half-way through another thread's call. For
/// cursor work that spans several calls (scans, seek-then-put), use
/// [`with`](Self::with).
#[derive(Debug, Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    /// Wraps an open handle.
    pub fn new(db: Database) -> Self {
        Self { inner: Arc::new(Mutex::new(db)) }
    }

    /// Opens `name` and wraps the handle.
    pub fn open<P: AsRef<Path>>(name: P, options: Options) -> Result<Self> {
        Database::open(name, options).map(Self::new)
    }

    /// Returns the value stored under `key`.
    pub fn fetch(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().fetch(key)
    }

    /// Inserts or replaces `key`.
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.lock().put(key, value)
    }

    /// Deletes `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.inner.lock().remove(key)
    }

    /// Runs `f` with exclusive access to the handle.
    pub fn with<R>(&self, f: impl FnOnce(&mut Database) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Returns the handle if this is the last clone.
    pub fn into_inner(self) -> std::result::Result<Database, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}
