use byteorder::{BigEndian, WriteBytesExt};
use memtable::{Memtable, Operation};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::{self, SstHeader, SST_VERSION};
use crate::SstError;

/// Writes one immutable SST file.
///
/// [`create`](SstWriter::create) claims the next number in the directory's
/// `sst%03d` sequence; the caller then writes the header and tuples and
/// [`finish`](SstWriter::finish)es the file. Tuples must be written in
/// ascending key order; the memtable's iteration order provides this.
pub struct SstWriter {
    file: File,
    path: PathBuf,
}

impl SstWriter {
    /// Creates the next numbered table in `dir` (created if missing),
    /// starting at `sst001` for an empty directory.
    pub fn create(dir: &Path) -> Result<Self, SstError> {
        fs::create_dir_all(dir)?;
        let number = format::next_file_number(dir)?;
        let path = dir.join(format::file_name(number));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        debug!(path = %path.display(), "created sst file");
        Ok(Self { file, path })
    }

    /// Creates the next table in `dir` and writes `mem`'s header and tuples
    /// into it. The returned writer is not yet finished; the engine seals
    /// the WAL first and then calls [`finish`](SstWriter::finish).
    ///
    /// `mem` must be non-empty; the header's key bounds are meaningless for
    /// an empty table.
    pub fn from_memtable(dir: &Path, mem: &Memtable) -> Result<Self, SstError> {
        let mut writer = Self::create(dir)?;
        let header = SstHeader {
            entry_count: mem.len() as u32,
            smallest_key: mem.smallest_key().cloned().unwrap_or_default(),
            longest_key: mem.longest_key().cloned().unwrap_or_default(),
            version: SST_VERSION,
        };
        writer.write_header(&header)?;
        for (key, op) in mem.iter() {
            writer.write_tuple(key, op)?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(&mut self, header: &SstHeader) -> Result<(), SstError> {
        format::write_header(&mut self.file, header)
    }

    /// Writes one tuple. DEL tuples carry no value block; they end after
    /// the key.
    pub fn write_tuple(&mut self, key: &[u8], op: &Operation) -> Result<(), SstError> {
        match op {
            Operation::Set(value) => {
                self.file.write_all(b"SET")?;
                self.file.write_u32::<BigEndian>(key.len() as u32)?;
                self.file.write_all(key)?;
                self.file.write_u32::<BigEndian>(value.len() as u32)?;
                self.file.write_all(value)?;
            }
            Operation::Del(_) => {
                self.file.write_all(b"DEL")?;
                self.file.write_u32::<BigEndian>(key.len() as u32)?;
                self.file.write_all(key)?;
            }
        }
        Ok(())
    }

    /// Flushes and fsyncs the file, consuming the writer. The table is
    /// immutable from here on.
    pub fn finish(mut self) -> Result<PathBuf, SstError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(self.path)
    }
}
