//! Database statistics.

use std::fmt;

use serde::Serialize;

use crate::{bucket, Database, Result};

/// A snapshot of the shape and size of a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    /// Number of leaf buckets.
    pub buckets: u64,
    /// Number of live records.
    pub records: u64,
    /// Largest mask any bucket is resolved at.
    pub deepest_mask: u64,
    /// Number of hash bits in use by the deepest bucket.
    pub depth: u32,
    /// Size of the `.dir` file.
    pub directory_bytes: u64,
    /// Size of the `.pag` file.
    pub page_bytes: u64,
    /// Size of the `.dat` file.
    pub content_bytes: u64,
    /// Content bytes referenced by live records.
    pub live_content_bytes: u64,
    /// Content bytes no live record references.
    pub unreclaimed_bytes: u64,
    /// Page blocks found corrupt by this handle.
    pub corrupt_pages_detected: u64,
}

impl fmt::Display for DbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "buckets:            {}", self.buckets)?;
        writeln!(f, "records:            {}", self.records)?;
        writeln!(f, "depth:              {} (mask {:#x})", self.depth, self.deepest_mask)?;
        writeln!(f, "directory bytes:    {}", self.directory_bytes)?;
        writeln!(f, "page bytes:         {}", self.page_bytes)?;
        writeln!(f, "content bytes:      {}", self.content_bytes)?;
        writeln!(f, "live content bytes: {}", self.live_content_bytes)?;
        writeln!(f, "unreclaimed bytes:  {}", self.unreclaimed_bytes)?;
        write!(f, "corrupt pages:      {}", self.corrupt_pages_detected)
    }
}

impl Database {
    /// Walks every bucket and reports the shape of the table.
    ///
    /// The cursor is not moved.
    pub fn stats(&mut self) -> Result<DbStats> {
        self.begin_op()?;
        let mut stats = DbStats::default();

        let mut hash = Some(0u64);
        while let Some(h) = hash {
            let (_, mask) = self.load_bucket(h as u32)?;
            let page = self.pages.page();
            stats.buckets += 1;
            stats.records += page.len() as u64;
            stats.live_content_bytes += page.iter().map(|e| e.length as u64).sum::<u64>();
            stats.deepest_mask = stats.deepest_mask.max(mask);
            hash = bucket::next_bucket(h, mask);
        }

        stats.depth = stats.deepest_mask.count_ones();
        stats.directory_bytes = self.dir.len()?;
        stats.page_bytes = self.pages.len()?;
        stats.content_bytes = self.content.len()?;
        stats.unreclaimed_bytes = stats.content_bytes.saturating_sub(stats.live_content_bytes);
        stats.corrupt_pages_detected = self.pages.corrupt_pages();
        Ok(stats)
    }
}
