//! The Data Tape: an append-only side buffer for variable-length blobs
//! (encoded strings, encoded bitmasks), deduplicated by a caller-chosen
//! key and re-addressable once the fixed region's final size is known.

use std::collections::HashMap;
use std::hash::Hash;

use crate::varint::{size_varint, write_varint_unsigned};

/// The two kinds of caller-chosen key the writer ever dedups Data Tape
/// entries by: a source value's own allocation identity (for strings)
/// or a writer's own arena index (for the one bitmask blob it owns).
/// Kept as a single sum type rather than two `usize`-keyed tapes so both
/// share one tape, matching the spec's single unified side buffer, with
/// no risk of a pointer-derived identity colliding with a small arena
/// index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TapeKey {
    Value(usize),
    Bitmask(usize),
}

/// A single Data Tape instance, owned by one in-flight encode.
#[derive(Debug, Default)]
pub struct DataTape<K: Eq + Hash> {
    bytes: Vec<u8>,
    positions: HashMap<K, i64>,
    offset_delta: i64,
}

impl<K: Eq + Hash> DataTape<K> {
    pub fn new() -> Self {
        DataTape {
            bytes: Vec::new(),
            positions: HashMap::new(),
            offset_delta: 0,
        }
    }

    /// Writes `blob` length-prefixed (unsigned LEB128 length followed by
    /// the bytes) if `key` hasn't been seen before, and records its tape
    /// position. Returns the number of bytes added to the tape (0 on a
    /// dedup hit).
    pub fn put(&mut self, key: K, blob: &[u8]) -> usize {
        if self.positions.contains_key(&key) {
            return 0;
        }
        let tail = self.bytes.len() as i64;
        self.positions.insert(key, tail);
        write_varint_unsigned(&mut self.bytes, blob.len() as u64);
        self.bytes.extend_from_slice(blob);
        self.bytes.len() - tail as usize
    }

    /// The stored position of `key`, offset by whatever was passed to
    /// [`DataTape::shift`], or `-1` if never put.
    pub fn get(&self, key: &K) -> i64 {
        match self.positions.get(key) {
            Some(&pos) => pos + self.offset_delta,
            None => -1,
        }
    }

    /// Relocates every future [`DataTape::get`] result by `to`, once the
    /// fixed region's final size is known and the tape is about to be
    /// appended after it.
    pub fn shift(&mut self, to: i64) {
        self.offset_delta = to;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn export(self) -> Vec<u8> {
        self.bytes
    }
}

/// The number of bytes `put` would need to emit for `blob`'s length
/// prefix, used by the allocate pass to account for tape growth before
/// any bytes are actually written.
pub fn size_varint_prefix(blob_len: usize) -> usize {
    size_varint(blob_len as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn put_dedups_by_key() {
        let mut tape: DataTape<u64> = DataTape::new();
        let written = tape.put(1, b"hello");
        assert_eq!(written, 1 + b"hello".len());
        let written_again = tape.put(1, b"world");
        assert_eq!(written_again, 0);
        assert_eq!(tape.get(&1), 0);
    }

    #[test]
    fn get_missing_key_is_negative_one() {
        let tape: DataTape<u64> = DataTape::new();
        assert_eq!(tape.get(&42), -1);
    }

    #[test]
    fn shift_offsets_future_gets() {
        let mut tape: DataTape<&str> = DataTape::new();
        tape.put("a", b"abc");
        let pos_before = tape.get(&"a");
        tape.shift(100);
        assert_eq!(tape.get(&"a"), pos_before + 100);
    }

    #[test]
    fn export_preserves_length_prefixed_layout() {
        let mut tape: DataTape<u64> = DataTape::new();
        tape.put(1, b"ab");
        tape.put(2, b"cde");
        let bytes = tape.export();
        let (len1, consumed1) = crate::varint::read_varint_unsigned(&bytes, 0);
        assert_eq!(len1, 2);
        let start2 = consumed1 + len1 as usize;
        let (len2, _) = crate::varint::read_varint_unsigned(&bytes, start2);
        assert_eq!(len2, 3);
    }
}
