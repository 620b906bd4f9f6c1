//! Iterator over every key-value pair in the database.
//!
//! Built on the handle's cursor: creating the iterator rewinds it, and each
//! step is a `next` followed by a `get`.

use crate::{Database, Result};

/// An iterator over `(key, value)` pairs in traversal order.
///
/// Stops after the first error.
///
/// # Example
///
/// ```rust,no_run
/// use edbm::{Database, Options};
///
/// # fn main() -> Result<(), edbm::Error> {
/// let mut db = Database::open("./history", Options::default())?;
///
/// for entry in db.entries() {
///     let (key, value) = entry?;
///     println!("{:?} => {:?}", key, value);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Entries<'a> {
    db: &'a mut Database,
    done: bool,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(db: &'a mut Database) -> Self {
        db.rewind();
        Self { db, done: false }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.db.next() {
            Ok(Some(key)) => self.db.get().map(|value| Some((key, value))),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match step {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Database {
    /// Returns an iterator over all key-value pairs, starting from the
    /// beginning. The cursor is left on the last pair returned.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries::new(self)
    }
}
