//! # Memtable
//!
//! An in-memory, sorted, mutable write buffer for the DriftKV storage engine.
//!
//! The memtable is the first point of contact for every mutation. It holds the
//! **most recent operation per key** in a sorted structure (`BTreeMap`) until
//! the engine flushes it to an immutable on-disk SST file.
//!
//! ## Key properties
//! - **Sorted order**: entries are always in ascending bytewise key order
//!   (required for the SST flush, which writes tuples in iteration order).
//! - **One entry per key**: a newer `SET` or `DEL` for a key replaces the
//!   older entry in place.
//! - **Tombstone support**: a delete does not remove the entry; it rewrites
//!   it as [`Operation::Del`] so a later lookup sees the tombstone before any
//!   older SST does. The tombstone retains the value that was live at delete
//!   time; the engine returns it from `del` and round-trips it through the
//!   write-ahead log.
//! - **Approximate size tracking**: tracks resident key + payload bytes for
//!   the engine's flush-threshold decision.
//!
//! ## Example
//! ```rust
//! use memtable::{Memtable, Operation};
//!
//! let mut m = Memtable::new();
//! m.set(b"hello".to_vec(), b"world".to_vec());
//! assert_eq!(m.get(b"hello"), Some(&Operation::Set(b"world".to_vec())));
//!
//! m.delete(b"hello".to_vec(), b"world".to_vec());
//! assert!(m.get(b"hello").unwrap().is_tombstone());
//! ```

use std::collections::BTreeMap;

/// The most recent mutation recorded for a key.
///
/// - `Set(value)`: the key maps to `value`.
/// - `Del(payload)`: the key is logically absent; `payload` is the value
///   observed at delete time, kept only for the delete's return contract and
///   log round-tripping. It is never served by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Set(Vec<u8>),
    Del(Vec<u8>),
}

impl Operation {
    /// Returns `true` for a delete marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Operation::Del(_))
    }

    /// The stored byte payload: the live value for `Set`, the value at
    /// delete time for `Del`.
    pub fn payload(&self) -> &[u8] {
        match self {
            Operation::Set(v) | Operation::Del(v) => v,
        }
    }
}

/// An ordered, in-memory write buffer backed by a `BTreeMap`.
///
/// The memtable tracks an approximate byte size (keys + payloads) so the
/// engine can decide when to flush. Unlike the on-disk structures it is
/// entirely transient: it is rebuilt from the write-ahead log's live records
/// on startup and drained after a successful flush.
#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, Operation>,
    approx_size: usize,
}

impl Memtable {
    /// Creates a new, empty memtable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a key with a live value.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.upsert(key, Operation::Set(value));
    }

    /// Records a tombstone for the given key, retaining `previous_value`
    /// (the value that was live when the delete was issued).
    ///
    /// The tombstone shadows any older value for the key both here and in
    /// SSTs during reads.
    pub fn delete(&mut self, key: Vec<u8>, previous_value: Vec<u8>) {
        self.upsert(key, Operation::Del(previous_value));
    }

    fn upsert(&mut self, key: Vec<u8>, op: Operation) {
        match self.map.get(&key) {
            Some(old) => {
                self.approx_size = self.approx_size.saturating_sub(old.payload().len());
            }
            None => {
                self.approx_size = self.approx_size.saturating_add(key.len());
            }
        }
        self.approx_size = self.approx_size.saturating_add(op.payload().len());
        self.map.insert(key, op);
    }

    /// Returns the most recent operation recorded for `key`, tombstones
    /// included. `None` means the memtable has never seen the key (or was
    /// drained since), and the caller should fall through to the SSTs.
    pub fn get(&self, key: &[u8]) -> Option<&Operation> {
        self.map.get(key)
    }

    /// Returns an iterator over all entries in **ascending key order**,
    /// tombstones included. The ordering guarantee is provided by the
    /// underlying `BTreeMap` and is relied on by the SST writer.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Operation)> {
        self.map.iter()
    }

    /// Bytewise-minimum key currently present, tombstones included.
    pub fn smallest_key(&self) -> Option<&Vec<u8>> {
        self.map.keys().next()
    }

    /// Bytewise-maximum key currently present, tombstones included.
    pub fn longest_key(&self) -> Option<&Vec<u8>> {
        self.map.keys().next_back()
    }

    /// Returns the number of entries (including tombstones).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the memtable contains zero entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate byte size of all resident keys and payloads. Excludes
    /// `BTreeMap` node overhead.
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// Removes all entries and resets the size counter. Called by the engine
    /// after a successful flush; reuses the existing allocation.
    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
    }
}
