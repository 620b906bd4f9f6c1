//! Error types for the edbm storage engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The result type used throughout edbm.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for edbm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// One of the three backing files is missing or unreadable.
    #[error("no database at {}: {source}", path.display())]
    NoDatabase {
        /// The backing file that could not be opened.
        path: PathBuf,
        /// Why it could not be opened.
        #[source]
        source: io::Error,
    },

    /// A mutating operation was attempted on a read-only handle.
    #[error("database is open read-only")]
    ReadOnly,

    /// The operation needs a current record and there is none.
    #[error("no current record")]
    NoCurrentRecord,

    /// The record can never fit in a page, no matter how often it is split.
    #[error("item too large: {size} bytes encoded, a page holds at most {max}")]
    ItemTooLarge {
        /// Encoded size of the record (key plus address and length).
        size: usize,
        /// Largest encoded record a page accepts.
        max: usize,
    },

    /// Splitting did not make room for the record.
    #[error("bucket {bucket} cannot be split further (mask {mask:#x})")]
    SplitLimit {
        /// The bucket that stayed full.
        bucket: u64,
        /// The mask it was resolved at when the cascade gave up.
        mask: u64,
    },

    /// The content file would outgrow the 32-bit addresses stored in pages.
    #[error("content file overflow: {size} bytes exceeds the addressable limit")]
    ContentOverflow {
        /// The size the content file would have reached.
        size: u64,
    },

    /// A page failed its validity check.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A lock could not be acquired or released.
    #[error("Lock error: {0}")]
    Lock(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Options could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Error::Lock(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns true for errors that say nothing about the stored data,
    /// only about the caller's use of the handle.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::ReadOnly | Error::NoCurrentRecord | Error::InvalidArgument(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("page 3");
        assert_eq!(err.to_string(), "Data corruption: page 3");

        let err = Error::ItemTooLarge { size: 5000, max: 4083 };
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("4083"));

        let err = Error::SplitLimit { bucket: 7, mask: 0xff };
        assert!(err.to_string().contains("0xff"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_no_database_names_path() {
        let err = Error::NoDatabase {
            path: PathBuf::from("/news/history.dir"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("history.dir"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_usage_errors() {
        assert!(Error::ReadOnly.is_usage());
        assert!(Error::NoCurrentRecord.is_usage());
        assert!(!Error::lock("fcntl").is_usage());
    }
}
