//! Index records and the order traversal walks them in.

use std::cmp::Ordering;

/// One record of a page: a key and the location of its value in the
/// content file.
///
/// A `Datum` always describes a stored record. Keys being searched for are
/// passed around as plain byte slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datum {
    /// The raw key bytes.
    pub key: Vec<u8>,
    /// Offset of the value in the content file.
    pub address: u32,
    /// Length of the value in bytes.
    pub length: u32,
}

impl Datum {
    /// Creates a new record.
    pub fn new(key: impl Into<Vec<u8>>, address: u32, length: u32) -> Self {
        Self { key: key.into(), address, length }
    }

    /// Offset one past the last value byte.
    pub fn end_address(&self) -> u64 {
        self.address as u64 + self.length as u64
    }
}

/// Order in which records of one page are visited by a sequential scan.
///
/// Longer keys come first; keys of equal length compare bytewise. The scan
/// is only required to visit every key once, so the order just has to be
/// total and stable.
pub fn key_order(a: &[u8], b: &[u8]) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longer_keys_first() {
        assert_eq!(key_order(b"abcd", b"z"), Ordering::Less);
        assert_eq!(key_order(b"z", b"abcd"), Ordering::Greater);
    }

    #[test]
    fn test_equal_length_bytewise() {
        assert_eq!(key_order(b"abc", b"abd"), Ordering::Less);
        assert_eq!(key_order(b"abc", b"abc"), Ordering::Equal);
        assert_eq!(key_order(&[0x80], &[0x7f]), Ordering::Greater);
    }

    #[test]
    fn test_order_sorts_consistently() {
        let mut keys: Vec<&[u8]> = vec![b"b", b"aa", b"a", b"", b"ab"];
        keys.sort_by(|a, b| key_order(a, b));
        assert_eq!(keys, vec![&b"aa"[..], b"ab", b"a", b"b", b""]);
    }

    #[test]
    fn test_end_address() {
        let d = Datum::new(b"k".to_vec(), u32::MAX, 10);
        assert_eq!(d.end_address(), u32::MAX as u64 + 10);
    }
}
