//! SST binary format constants, header read/write helpers, and the
//! `sst%03d` file-numbering scheme.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::SstError;

/// Magic bytes identifying an SST file.
pub const SST_MAGIC: &[u8; 4] = b"SSTF";

/// Current format version, written into every header.
pub const SST_VERSION: u16 = 1;

const FILE_PREFIX: &str = "sst";

/// Parsed SST header. `smallest_key` and `longest_key` bound every key in
/// the file bytewise, which lets a lookup skip the tuple scan entirely when
/// the target falls outside the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstHeader {
    pub entry_count: u32,
    pub smallest_key: Vec<u8>,
    pub longest_key: Vec<u8>,
    pub version: u16,
}

pub fn write_header<W: Write>(w: &mut W, header: &SstHeader) -> Result<(), SstError> {
    w.write_all(SST_MAGIC)?;
    w.write_u32::<BigEndian>(header.entry_count)?;
    w.write_u32::<BigEndian>(header.smallest_key.len() as u32)?;
    w.write_all(&header.smallest_key)?;
    w.write_u32::<BigEndian>(header.longest_key.len() as u32)?;
    w.write_all(&header.longest_key)?;
    w.write_u16::<BigEndian>(header.version)?;
    Ok(())
}

pub fn read_header<R: Read>(r: &mut R) -> Result<SstHeader, SstError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != SST_MAGIC {
        return Err(SstError::InvalidFormat(format!(
            "bad magic: {:?}",
            magic
        )));
    }

    let entry_count = r.read_u32::<BigEndian>()?;

    let smallest_key_len = r.read_u32::<BigEndian>()? as usize;
    let mut smallest_key = vec![0u8; smallest_key_len];
    r.read_exact(&mut smallest_key)?;

    let longest_key_len = r.read_u32::<BigEndian>()? as usize;
    let mut longest_key = vec![0u8; longest_key_len];
    r.read_exact(&mut longest_key)?;

    let version = r.read_u16::<BigEndian>()?;

    Ok(SstHeader {
        entry_count,
        smallest_key,
        longest_key,
        version,
    })
}

/// File name for table `number`, e.g. `sst007`.
pub fn file_name(number: u32) -> String {
    format!("{}{:03}", FILE_PREFIX, number)
}

/// Numbers of all `sst%03d` files in `dir`, ascending. Names that do not
/// match the scheme are ignored.
pub fn file_numbers(dir: &Path) -> Result<Vec<u32>, SstError> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = parse_file_number(&entry.file_name().to_string_lossy()) {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Number for the next table: one past the highest existing, `1` for an
/// empty directory.
pub fn next_file_number(dir: &Path) -> Result<u32, SstError> {
    Ok(file_numbers(dir)?.last().copied().unwrap_or(0) + 1)
}

fn parse_file_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(FILE_PREFIX)?;
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
