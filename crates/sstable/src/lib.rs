//! # SST — Sorted String Table
//!
//! Immutable, on-disk storage files for the DriftKV storage engine.
//!
//! When the engine flushes the in-memory [`memtable::Memtable`] it writes one
//! SST file. SSTs are **write-once, read-many** — once closed they are never
//! modified or deleted, and lookups consult them newest-to-oldest.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ HEADER                                             │
//! │                                                    │
//! │ magic "SSTF" | entry_count (u32)                   │
//! │ smallest_key_len (u32) | smallest_key              │
//! │ longest_key_len (u32)  | longest_key               │
//! │ version (u16)                                      │
//! ├────────────────────────────────────────────────────┤
//! │ TUPLES (ascending key order, entry_count of them)  │
//! │                                                    │
//! │ "SET" | key_len (u32) | key | val_len (u32) | val  │
//! │ "DEL" | key_len (u32) | key                        │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Files are numbered `sst001`, `sst002`, … in
//! strictly ascending creation order; lower numbers are older.

use std::io;
use thiserror::Error;

mod format;
mod reader;
mod writer;

pub use format::{
    file_name, file_numbers, next_file_number, SstHeader, SST_MAGIC, SST_VERSION,
};
pub use reader::{SstLookup, SstReader};
pub use writer::SstWriter;

#[derive(Debug, Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid sst file format: {0}")]
    InvalidFormat(String),
}
