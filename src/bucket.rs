//! Bucket arithmetic for the split-bit directory.
//!
//! A bucket is named by the low bits of a hash under a mask of the form
//! `2^k - 1`. Splitting bucket `b` at mask `m` sets directory bit `b + m`
//! and moves the records whose hash has bit `m + 1` set into the sibling
//! bucket `b + m + 1`. These functions hold that arithmetic in one place
//! so the handle, the traversal and the tests agree on it.

use crate::error::{Error, Result};
use crate::hash::{calc_hash, MAX_MASK};
use crate::page::Page;

/// Directory bit that records whether `bucket` at `mask` has been split.
pub fn split_bit(bucket: u64, mask: u64) -> u64 {
    bucket + mask
}

/// The bucket that receives half of `bucket` when it splits at `mask`.
pub fn sibling(bucket: u64, mask: u64) -> u64 {
    bucket + mask + 1
}

/// The mask one level deeper than `mask`.
pub fn deeper(mask: u64) -> u64 {
    (mask << 1) | 1
}

/// True if a record with `hash` moves to the sibling when its bucket splits
/// at `mask`.
pub fn moves_on_split(hash: u32, mask: u64) -> bool {
    hash as u64 & (mask + 1) != 0
}

/// Walks the directory from the root and returns the `(bucket, mask)`
/// holding `hash`. `is_split` reports a directory bit.
pub fn resolve<F>(hash: u32, mut is_split: F) -> Result<(u64, u64)>
where
    F: FnMut(u64) -> Result<bool>,
{
    let hash = hash as u64;
    let mut mask = 0;
    loop {
        let bucket = hash & mask;
        if mask >= MAX_MASK || !is_split(split_bit(bucket, mask))? {
            return Ok((bucket, mask));
        }
        mask = deeper(mask);
    }
}

/// The next bucket in traversal order after the one `hash` selects at
/// `mask`, or `None` once the whole tree has been covered.
///
/// Traversal treats the masked hash as a bit-reversed counter: it clears
/// trailing set bits from the top of the mask down and sets the first
/// clear one. Every leaf bucket is visited exactly once.
pub fn next_bucket(hash: u64, mask: u64) -> Option<u64> {
    let mut hash = hash & mask;
    let mut bit = mask + 1;
    loop {
        bit >>= 1;
        if bit == 0 {
            return None;
        }
        if hash & bit == 0 {
            return Some(hash | bit);
        }
        hash &= !bit;
    }
}

/// Moves the records of `page` that belong to the sibling when it splits at
/// `mask` into a new page, which is returned.
pub fn split_page(page: &mut Page, mask: u64) -> Result<Page> {
    let mut sibling = Page::new();
    let mut i = 0;
    while let Some(entry) = page.get(i) {
        if !moves_on_split(calc_hash(entry.key), mask) {
            i += 1;
            continue;
        }
        if sibling.insert(entry.key, entry.address, entry.length).is_none() {
            return Err(Error::corruption("split produced a sibling larger than its page"));
        }
        page.remove(i);
    }
    Ok(sibling)
}
