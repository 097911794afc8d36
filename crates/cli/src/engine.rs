//! The storage engine: an ordered memtable fronted by a write-ahead log,
//! with lookups falling through to the SST files newest-to-oldest.
//!
//! Every mutation is appended to the WAL **before** the memtable is touched,
//! so a failed append leaves memory and disk consistent. On startup the
//! memtable is rebuilt from the WAL's live records; a flush drains it into
//! the next numbered SST and retires the corresponding WAL records.

use std::io;
use std::path::PathBuf;

use memtable::{Memtable, Operation};
use sstable::{SstError, SstLookup, SstReader, SstWriter};
use thiserror::Error;
use tracing::{info, warn};
use wal::{Wal, WalError, WalRecord, WATERMARK_PLACEHOLDER};

const WAL_DIR: &str = "walStorage";
const WAL_FILE: &str = "wal.bin";
const SST_DIR: &str = "sstStorage";

const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Key not found")]
    NotFound,
    #[error("Key is marked as deleted")]
    Tombstoned,
    #[error("Key must not be empty")]
    EmptyKey,
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Sst(#[from] SstError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The capability the shell consumes: insert-or-overwrite, point lookup,
/// and logical delete returning the previous value.
pub trait Db {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), DbError>;
    fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, DbError>;
    fn del(&mut self, key: &[u8]) -> Result<Vec<u8>, DbError>;
}

/// Engine construction parameters. The storage layout lives under
/// `data_dir`:
///
/// ```text
/// <data_dir>/walStorage/wal.bin
/// <data_dir>/sstStorage/sst001 ... sstNNN
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub data_dir: PathBuf,
    /// fsync the WAL on every append. Off by default: data is durable in
    /// the page cache once `set`/`del` return.
    pub wal_sync: bool,
    /// Memtable size (resident key + payload bytes) at which a mutation
    /// triggers an automatic flush.
    pub flush_threshold: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("disk"),
            wal_sync: false,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

/// The single-writer storage engine. Owns the WAL handle exclusively; SST
/// handles are opened per lookup and the SST directory is re-listed on
/// every lookup miss rather than cached.
pub struct MemDb {
    mem: Memtable,
    wal: Wal,
    sst_dir: PathBuf,
    flush_threshold: usize,
}

impl MemDb {
    /// Opens (or creates) the store under `config.data_dir` and rebuilds
    /// the memtable from the WAL's live records.
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        let wal_dir = config.data_dir.join(WAL_DIR);
        let sst_dir = config.data_dir.join(SST_DIR);
        std::fs::create_dir_all(&wal_dir)?;
        std::fs::create_dir_all(&sst_dir)?;

        let wal = Wal::open(wal_dir.join(WAL_FILE), config.wal_sync)?;
        let mut db = Self {
            mem: Memtable::new(),
            wal,
            sst_dir,
            flush_threshold: config.flush_threshold,
        };
        db.load()?;
        Ok(db)
    }

    /// Replays the WAL into the empty memtable: live (placeholder) records
    /// are applied in file order, retired records are skipped. A parse
    /// failure at the tail is a torn append from a crash; replay stops
    /// there. Afterwards the log is compacted down to its live records,
    /// which also discards any torn tail.
    fn load(&mut self) -> Result<(), DbError> {
        let size = self.wal.size()?;
        let mut replayed = 0usize;
        let mut offset = 0u64;
        while offset < size {
            match self.wal.read_record_at(offset) {
                Ok((record, next_offset, watermark)) => {
                    if watermark == WATERMARK_PLACEHOLDER {
                        match record {
                            WalRecord::Set { key, value } => self.mem.set(key, value),
                            WalRecord::Del { key, value } => self.mem.delete(key, value),
                        }
                        replayed += 1;
                    }
                    offset = next_offset;
                }
                Err(e) if e.is_truncation() => {
                    warn!(offset, "truncated record at log tail, stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.wal.clear()?;
        info!(replayed, "recovered memtable from write-ahead log");
        Ok(())
    }

    /// Drains the memtable into the next numbered SST file.
    ///
    /// Writes the header and tuples, seals the WAL (every record retired),
    /// closes the SST, and clears the memtable. A failure before the seal
    /// leaves the engine unchanged apart from a half-written file that the
    /// numbering scheme steps past.
    pub fn flush(&mut self) -> Result<(), DbError> {
        if self.mem.is_empty() {
            return Ok(());
        }

        let entries = self.mem.len();
        let writer = SstWriter::from_memtable(&self.sst_dir, &self.mem)?;
        self.wal.update_watermark()?;
        let path = writer.finish()?;
        self.mem.clear();

        info!(entries, path = %path.display(), "flushed memtable to sst");
        Ok(())
    }

    fn maybe_flush(&mut self) -> Result<(), DbError> {
        if self.mem.approx_size() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Lookup across the SST files in descending number order (newest
    /// first). The first file with an answer wins; an unreadable file is
    /// skipped for this query.
    fn get_from_ssts(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        for number in sstable::file_numbers(&self.sst_dir)?.into_iter().rev() {
            let path = self.sst_dir.join(sstable::file_name(number));
            match SstReader::open(&path).and_then(|mut reader| reader.get(key)) {
                Ok(SstLookup::Found(value)) => return Ok(value),
                Ok(SstLookup::Tombstoned) => return Err(DbError::Tombstoned),
                Ok(SstLookup::NotFound) => continue,
                Err(SstError::Io(e)) => {
                    warn!(path = %path.display(), error = %e, "sst unreachable, skipping for this lookup");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DbError::NotFound)
    }
}

impl Db for MemDb {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        if key.is_empty() {
            return Err(DbError::EmptyKey);
        }

        let record = WalRecord::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.wal.append(WATERMARK_PLACEHOLDER, &record)?;

        self.mem.set(key.to_vec(), value.to_vec());
        self.maybe_flush()
    }

    fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        match self.mem.get(key) {
            Some(Operation::Set(value)) => return Ok(value.clone()),
            Some(Operation::Del(_)) => return Err(DbError::Tombstoned),
            None => {}
        }
        self.get_from_ssts(key)
    }

    /// Deletes a key the memtable knows as live, returning the value it
    /// held. The memtable is authoritative here: a key that only exists in
    /// SSTs reports `NotFound` rather than being resurrected for its
    /// previous value.
    fn del(&mut self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        if key.is_empty() {
            return Err(DbError::EmptyKey);
        }

        let previous = match self.mem.get(key) {
            Some(Operation::Set(value)) => value.clone(),
            Some(Operation::Del(_)) | None => return Err(DbError::NotFound),
        };

        let record = WalRecord::Del {
            key: key.to_vec(),
            value: previous.clone(),
        };
        self.wal.append(WATERMARK_PLACEHOLDER, &record)?;

        self.mem.delete(key.to_vec(), previous.clone());
        self.maybe_flush()?;
        Ok(previous)
    }
}
