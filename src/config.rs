//! Configuration options for opening an edbm database.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash::HASH_BITS;

/// How a handle keeps other processes from stepping on its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategy {
    /// Lock exactly the directory and page blocks an operation touches.
    /// Operations on disjoint buckets proceed concurrently.
    ByteRange,

    /// Hold an exclusive lock on the whole database from open to close.
    WholeFile,

    /// No engine-level locking. The application must admit at most one
    /// writer at a time by some coarser means of its own.
    None,
}

impl Default for LockStrategy {
    fn default() -> Self {
        #[cfg(unix)]
        return LockStrategy::ByteRange;

        #[cfg(not(unix))]
        LockStrategy::WholeFile
    }
}

/// What to do with a page block that fails its validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptPagePolicy {
    /// Log it, count it and continue with an empty page.
    /// Whatever the block held is lost on the next write.
    #[default]
    Zero,

    /// Return `Error::Corruption` and leave the block untouched.
    Fail,
}

/// Configuration options for opening a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Open read-only even if the files are writable.
    /// Default: false
    pub read_only: bool,

    /// Locking discipline.
    /// Default: `ByteRange` on unix, `WholeFile` elsewhere
    pub lock_strategy: LockStrategy,

    /// Handling of page blocks that fail the slot-offset check.
    /// Default: `CorruptPagePolicy::Zero`
    pub corrupt_page_policy: CorruptPagePolicy,

    /// Call `sync_data` after every block and content write.
    /// Default: false
    pub sync_writes: bool,

    /// Maximum number of splits a single insert may trigger.
    /// Default: 32 (one per hash bit)
    pub split_retry_limit: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            read_only: false,
            lock_strategy: LockStrategy::default(),
            corrupt_page_policy: CorruptPagePolicy::default(),
            sync_writes: false,
            split_retry_limit: HASH_BITS,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::Error::Config(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let options: Options = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets whether to open the database read-only.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the locking strategy.
    pub fn lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    /// Sets the corrupt page policy.
    pub fn corrupt_page_policy(mut self, policy: CorruptPagePolicy) -> Self {
        self.corrupt_page_policy = policy;
        self
    }

    /// Enables or disables syncing after each write.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the split cascade limit.
    pub fn split_retry_limit(mut self, limit: u32) -> Self {
        self.split_retry_limit = limit;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.split_retry_limit == 0 {
            return Err(crate::Error::invalid_argument("split_retry_limit must be > 0"));
        }
        if self.split_retry_limit > HASH_BITS {
            return Err(crate::Error::invalid_argument(format!(
                "split_retry_limit must be <= {}",
                HASH_BITS
            )));
        }
        if cfg!(not(unix)) && self.lock_strategy == LockStrategy::ByteRange {
            return Err(crate::Error::invalid_argument(
                "byte-range locking is only available on unix",
            ));
        }
        Ok(())
    }
}
