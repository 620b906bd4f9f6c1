//! Slotted page codec.
//!
//! Every bucket lives in one fixed-size block of the `.pag` file:
//!
//! ```text
//! offset 0:        [count: u16]
//! offset 2:        [slot 0: u16] [slot 1: u16] ... [slot n-1: u16]   -> grows up
//!                  <free space>
//! slot n-1:        [address: u32][length: u32][key n-1]              <- grows down
//! ...
//! slot 0:          [address: u32][length: u32][key 0]
//! PAGE_SIZE:       <end of block>
//! ```
//!
//! A slot holds the offset where its record starts. Record `i` ends where
//! record `i - 1` starts, and record 0 ends at the end of the block, so the
//! key length is implied: `end - start - 8`. All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::datum::{key_order, Datum};

/// Size of a page block in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the record count and of each slot.
pub const SLOT_SIZE: usize = 2;

/// Size of the address and length that precede each key.
pub const RECORD_HEADER: usize = 8;

/// Largest encoded record (key plus header) that fits in an empty page.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - 2 * SLOT_SIZE - 1;

/// Largest key that can be stored.
pub const MAX_KEY_LEN: usize = MAX_RECORD_SIZE - RECORD_HEADER;

/// A record viewed in place inside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    /// Key bytes.
    pub key: &'a [u8],
    /// Value offset in the content file.
    pub address: u32,
    /// Value length.
    pub length: u32,
}

impl Entry<'_> {
    /// Copies the entry out of its page.
    pub fn to_datum(&self) -> Datum {
        Datum::new(self.key.to_vec(), self.address, self.length)
    }
}

/// One page block, always structurally valid.
///
/// Pages only come from [`Page::new`] or from [`Page::decode`], which
/// rejects blocks whose slot offsets are inconsistent, so the accessors can
/// index the buffer directly.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("count", &self.len())
            .field("free", &self.free_space())
            .finish()
    }
}

impl Page {
    /// Creates an empty page.
    pub fn new() -> Self {
        Self { data: Box::new([0u8; PAGE_SIZE]) }
    }

    /// Decodes a block read from disk.
    ///
    /// A short buffer is treated as zero-filled past its end, which is what
    /// reading past the end of the `.pag` file yields. Returns `None` if the
    /// slot table is inconsistent.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut page = Self::new();
        let n = bytes.len().min(PAGE_SIZE);
        page.data[..n].copy_from_slice(&bytes[..n]);
        if page.is_consistent() {
            Some(page)
        } else {
            None
        }
    }

    /// Returns true if a record with a key of `key_len` bytes fits in an
    /// empty page.
    pub fn fits(key_len: usize) -> bool {
        key_len + RECORD_HEADER <= MAX_RECORD_SIZE
    }

    /// The raw block.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Number of records in the page.
    pub fn len(&self) -> usize {
        self.read_u16(0) as usize
    }

    /// Returns true if the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes left between the slot table and the lowest record.
    pub fn free_space(&self) -> usize {
        self.low_water() - (self.len() + 1) * SLOT_SIZE
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Returns record `index`, if it exists.
    pub fn get(&self, index: usize) -> Option<Entry<'_>> {
        if index >= self.len() {
            return None;
        }
        let start = self.slot(index);
        let end = self.record_end(index);
        let mut header = &self.data[start..start + RECORD_HEADER];
        let address = header.get_u32_le();
        let length = header.get_u32_le();
        Some(Entry {
            key: &self.data[start + RECORD_HEADER..end],
            address,
            length,
        })
    }

    /// Iterates over the records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entry<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Finds the slot holding exactly `key`.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.iter().position(|e| e.key == key)
    }

    /// The record that a sequential scan visits first in this page.
    pub fn first(&self) -> Option<Entry<'_>> {
        self.iter().min_by(|a, b| key_order(a.key, b.key))
    }

    /// The record a sequential scan visits right after `key`, which need not
    /// be present in the page.
    pub fn successor(&self, key: &[u8]) -> Option<Entry<'_>> {
        self.iter()
            .filter(|e| key_order(key, e.key).is_lt())
            .min_by(|a, b| key_order(a.key, b.key))
    }

    /// Appends a record. Returns its slot, or `None` if it does not fit.
    pub fn insert(&mut self, key: &[u8], address: u32, length: u32) -> Option<usize> {
        let count = self.len();
        let need = key.len() + RECORD_HEADER;
        let low = self.low_water();
        if need >= low {
            return None;
        }
        let start = low - need;
        if start <= (count + 2) * SLOT_SIZE {
            return None;
        }

        self.set_slot(count, start);
        let mut out = &mut self.data[start..start + RECORD_HEADER];
        out.put_u32_le(address);
        out.put_u32_le(length);
        self.data[start + RECORD_HEADER..start + need].copy_from_slice(key);
        self.write_u16(0, (count + 1) as u16);
        Some(count)
    }

    /// Removes record `index`, sliding the records below it up to close the
    /// gap. Returns false if there is no such record.
    pub fn remove(&mut self, index: usize) -> bool {
        let count = self.len();
        if index >= count {
            return false;
        }
        let start = self.slot(index);
        let width = self.record_end(index) - start;
        let low = self.low_water();

        self.data.copy_within(low..start, low + width);
        self.data[low..low + width].fill(0);
        for j in index + 1..count {
            let moved = self.slot(j) + width;
            self.set_slot(j - 1, moved);
        }
        self.set_slot(count - 1, 0);
        self.write_u16(0, (count - 1) as u16);
        true
    }

    /// Checks the slot table: it fits in the block, offsets never increase,
    /// every record has room for its header, and no record overlaps the
    /// slot table.
    fn is_consistent(&self) -> bool {
        let count = self.len();
        let table_end = (count + 1) * SLOT_SIZE;
        if table_end > PAGE_SIZE {
            return false;
        }
        let mut end = PAGE_SIZE;
        for i in 0..count {
            let start = self.slot(i);
            if start > end || end - start < RECORD_HEADER {
                return false;
            }
            end = start;
        }
        end >= table_end
    }

    fn low_water(&self) -> usize {
        match self.len() {
            0 => PAGE_SIZE,
            n => self.slot(n - 1),
        }
    }

    fn record_end(&self, index: usize) -> usize {
        match index {
            0 => PAGE_SIZE,
            i => self.slot(i - 1),
        }
    }

    fn slot(&self, index: usize) -> usize {
        self.read_u16(SLOT_SIZE * (index + 1)) as usize
    }

    fn set_slot(&mut self, index: usize, offset: usize) {
        self.write_u16(SLOT_SIZE * (index + 1), offset as u16);
    }

    fn read_u16(&self, at: usize) -> u16 {
        (&self.data[at..at + 2]).get_u16_le()
    }

    fn write_u16(&mut self, at: usize, value: u16) {
        (&mut self.data[at..at + 2]).put_u16_le(value);
    }
}
