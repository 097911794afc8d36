use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::format::{self, SstHeader};
use crate::SstError;

/// Outcome of a point lookup against one SST file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SstLookup {
    /// The key's newest operation in this file is a live SET.
    Found(Vec<u8>),
    /// The key's newest operation in this file is a delete marker; it masks
    /// any older value in lower-numbered files.
    Tombstoned,
    /// The file says nothing about this key; consult the next-older file.
    NotFound,
}

/// Reads one SST file for point lookups.
///
/// The file handle lives only as long as the reader; the engine opens a
/// fresh reader per file per query.
pub struct SstReader {
    rdr: BufReader<File>,
}

impl SstReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SstError> {
        let file = File::open(path)?;
        Ok(Self {
            rdr: BufReader::new(file),
        })
    }

    /// Parses the header from the start of the file, validating the magic.
    pub fn read_header(&mut self) -> Result<SstHeader, SstError> {
        self.rdr.seek(SeekFrom::Start(0))?;
        format::read_header(&mut self.rdr)
    }

    /// Point lookup: reads the header, then scans tuples in stored order.
    ///
    /// Keys outside the header's `[smallest_key, longest_key]` range are
    /// answered without touching the tuples. Non-matching SET payloads are
    /// skipped over, not materialized.
    pub fn get(&mut self, key: &[u8]) -> Result<SstLookup, SstError> {
        let header = self.read_header()?;

        if key < header.smallest_key.as_slice() || key > header.longest_key.as_slice() {
            return Ok(SstLookup::NotFound);
        }

        for _ in 0..header.entry_count {
            let mut op = [0u8; 3];
            self.rdr.read_exact(&mut op)?;

            let key_len = self.rdr.read_u32::<BigEndian>()? as usize;
            let mut tuple_key = vec![0u8; key_len];
            self.rdr.read_exact(&mut tuple_key)?;

            match &op {
                b"SET" => {
                    let val_len = self.rdr.read_u32::<BigEndian>()? as usize;
                    if tuple_key.as_slice() == key {
                        let mut value = vec![0u8; val_len];
                        self.rdr.read_exact(&mut value)?;
                        return Ok(SstLookup::Found(value));
                    }
                    self.rdr.seek_relative(val_len as i64)?;
                }
                b"DEL" => {
                    if tuple_key.as_slice() == key {
                        return Ok(SstLookup::Tombstoned);
                    }
                }
                other => {
                    return Err(SstError::InvalidFormat(format!(
                        "unknown tuple operation: {:?}",
                        other
                    )))
                }
            }
        }

        Ok(SstLookup::NotFound)
    }
}
