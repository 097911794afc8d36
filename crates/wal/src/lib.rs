use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Watermark of a record whose effect has not yet been flushed to an SST.
pub const WATERMARK_PLACEHOLDER: u32 = 0x0000_0000;
/// Watermark of a record whose effect is persisted in some SST file.
pub const WATERMARK_RETIRED: u32 = 0x0000_DEAD;

/// File name of the transient sibling used by the rewrite protocols.
pub const SIBLING_FILE_NAME: &str = "new_wal.bin";

const OP_SET: &[u8; 3] = b"SET";
const OP_DEL: &[u8; 3] = b"DEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// `value` is the live value observed when the delete was issued.
    Del {
        key: Vec<u8>,
        value: Vec<u8>,
    },
}

impl WalRecord {
    fn op_bytes(&self) -> &'static [u8; 3] {
        match self {
            WalRecord::Set { .. } => OP_SET,
            WalRecord::Del { .. } => OP_DEL,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Set { key, .. } | WalRecord::Del { key, .. } => key,
        }
    }

    pub fn value(&self) -> &[u8] {
        match self {
            WalRecord::Set { value, .. } | WalRecord::Del { value, .. } => value,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid watermark value: {0:#010x}")]
    InvalidWatermark(u32),
    #[error("unknown operation in record: {0:?}")]
    UnknownOperation([u8; 3]),
}

impl WalError {
    /// True when the error is a short read at the end of the file, i.e. a
    /// truncated trailing record left by a crash mid-append.
    pub fn is_truncation(&self) -> bool {
        matches!(self, WalError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Append-only log of mutations. One record per mutation:
///
/// ```text
/// watermark (u32 BE) | op (3 ASCII) | key_len (u32 BE) | key | val_len (u32 BE) | value
/// ```
///
/// Records are concatenated with no padding. The file is append-only at
/// steady state; [`update_watermark`](Wal::update_watermark) and
/// [`clear`](Wal::clear) rewrite it through a sibling file plus an atomic
/// rename.
pub struct Wal {
    file: File,
    path: PathBuf,
    sync: bool,
}

impl Wal {
    /// Opens `path` for read/append, creating it if missing. Never truncates.
    ///
    /// With `sync` enabled every append is followed by `sync_all`.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self { file, path, sync })
    }

    /// Appends one record. Callers pass [`WATERMARK_PLACEHOLDER`]; the
    /// retired value is written only by the rewrite protocols.
    pub fn append(&mut self, watermark: u32, record: &WalRecord) -> Result<(), WalError> {
        write_record(&mut self.file, watermark, record)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Parses the record beginning at `offset`, returning the record, the
    /// offset of the record immediately following, and the watermark as
    /// stored.
    pub fn read_record_at(&mut self, offset: u64) -> Result<(WalRecord, u64, u32), WalError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut rdr = BufReader::new(&self.file);

        let watermark = rdr.read_u32::<BigEndian>()?;
        if watermark != WATERMARK_PLACEHOLDER && watermark != WATERMARK_RETIRED {
            return Err(WalError::InvalidWatermark(watermark));
        }

        let mut op = [0u8; 3];
        rdr.read_exact(&mut op)?;

        let key_len = rdr.read_u32::<BigEndian>()?;
        let mut key = vec![0u8; key_len as usize];
        rdr.read_exact(&mut key)?;

        let val_len = rdr.read_u32::<BigEndian>()?;
        let mut value = vec![0u8; val_len as usize];
        rdr.read_exact(&mut value)?;

        let record = match &op {
            OP_SET => WalRecord::Set { key, value },
            OP_DEL => WalRecord::Del { key, value },
            _ => return Err(WalError::UnknownOperation(op)),
        };

        // watermark + op + two length prefixes + payloads
        let next_offset = offset + 4 + 3 + 4 + key_len as u64 + 4 + val_len as u64;
        Ok((record, next_offset, watermark))
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata()?.len())
    }

    /// Scans the whole file and returns the trailing record, or `None` for an
    /// empty log. Linear in file size; used only on maintenance paths.
    pub fn last_record(&mut self) -> Result<Option<WalRecord>, WalError> {
        let size = self.size()?;
        let mut last = None;
        let mut offset = 0u64;
        while offset < size {
            let (record, next_offset, _) = self.read_record_at(offset)?;
            last = Some(record);
            offset = next_offset;
        }
        Ok(last)
    }

    /// Seals the log after a flush: rewrites every record with the retired
    /// watermark and atomically renames the sibling over the original.
    ///
    /// A reader that encounters a retired record must treat its effect as
    /// already persisted in some SST.
    pub fn update_watermark(&mut self) -> Result<(), WalError> {
        let rewritten = self.rewrite(|_| Some(WATERMARK_RETIRED))?;
        info!(records = rewritten, "sealed write-ahead log");
        Ok(())
    }

    /// Drops retired records, keeping only live (placeholder-watermark)
    /// records in the rewritten file.
    pub fn clear(&mut self) -> Result<(), WalError> {
        let kept = self.rewrite(|watermark| {
            (watermark == WATERMARK_PLACEHOLDER).then_some(WATERMARK_PLACEHOLDER)
        })?;
        info!(records = kept, "cleared retired records from write-ahead log");
        Ok(())
    }

    /// Rewrite-and-rename: copies each record into the sibling file with its
    /// watermark mapped through `keep` (`None` drops the record), then
    /// renames the sibling over the original and reopens the handle.
    ///
    /// Returns the number of records written. A stale sibling left by an
    /// earlier crash is truncated here.
    fn rewrite<F>(&mut self, keep: F) -> Result<usize, WalError>
    where
        F: Fn(u32) -> Option<u32>,
    {
        let sibling = self.path.with_file_name(SIBLING_FILE_NAME);
        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&sibling)?;

        let size = self.size()?;
        let mut written = 0usize;
        let mut offset = 0u64;
        while offset < size {
            let (record, next_offset, watermark) = match self.read_record_at(offset) {
                Ok(parts) => parts,
                // A torn append at the tail is not copied over; the rewrite
                // leaves the log well-formed again.
                Err(e) if e.is_truncation() => {
                    warn!(offset, "dropping truncated record at log tail");
                    break;
                }
                Err(e) => return Err(e),
            };
            if let Some(watermark) = keep(watermark) {
                write_record(&mut out, watermark, &record)?;
                written += 1;
            }
            offset = next_offset;
        }

        out.flush()?;
        out.sync_all()?;
        drop(out);

        fs::rename(&sibling, &self.path)?;
        debug!(path = %self.path.display(), "renamed rewritten log into place");

        // The old handle points at the unlinked inode; reopen the renamed file.
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;
        Ok(written)
    }
}

fn write_record<W: Write>(w: &mut W, watermark: u32, record: &WalRecord) -> io::Result<()> {
    let key = record.key();
    let value = record.value();
    let mut buf = Vec::with_capacity(4 + 3 + 4 + key.len() + 4 + value.len());
    buf.write_u32::<BigEndian>(watermark)?;
    buf.extend_from_slice(record.op_bytes());
    buf.write_u32::<BigEndian>(key.len() as u32)?;
    buf.extend_from_slice(key);
    buf.write_u32::<BigEndian>(value.len() as u32)?;
    buf.extend_from_slice(value);
    w.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(key: &[u8], value: &[u8]) -> WalRecord {
        WalRecord::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn del(key: &[u8], value: &[u8]) -> WalRecord {
        WalRecord::Del {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    // -------------------- Round trips --------------------

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        let record = set(b"test_key", b"test_value");
        wal.append(WATERMARK_PLACEHOLDER, &record).unwrap();

        let (read, next_offset, watermark) = wal.read_record_at(0).unwrap();
        assert_eq!(read, record);
        assert_eq!(watermark, WATERMARK_PLACEHOLDER);
        assert_eq!(next_offset, wal.size().unwrap());
    }

    #[test]
    fn del_record_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &del(b"k", b"old-value"))
            .unwrap();

        let (read, _, _) = wal.read_record_at(0).unwrap();
        assert_eq!(read, del(b"k", b"old-value"));
    }

    #[test]
    fn retired_watermark_round_trips() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_RETIRED, &set(b"k", b"v")).unwrap();
        let (_, _, watermark) = wal.read_record_at(0).unwrap();
        assert_eq!(watermark, WATERMARK_RETIRED);
    }

    #[test]
    fn empty_value_round_trips() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"k", b"")).unwrap();
        let (read, _, _) = wal.read_record_at(0).unwrap();
        assert_eq!(read.value(), b"");
    }

    #[test]
    fn record_byte_layout_is_big_endian() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        let mut wal = Wal::open(&path, false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"apple", b"fruit"))
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // placeholder
        expected.extend_from_slice(b"SET");
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
        expected.extend_from_slice(b"apple");
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x05]);
        expected.extend_from_slice(b"fruit");
        assert_eq!(bytes, expected);
    }

    // -------------------- Append-only chaining --------------------

    #[test]
    fn offsets_chain_across_two_records() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        let first = set(b"key1", b"value1");
        let second = set(b"key2", b"value2");
        wal.append(WATERMARK_PLACEHOLDER, &first).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &second).unwrap();

        let (read, offset, _) = wal.read_record_at(0).unwrap();
        assert_eq!(read, first);

        let (read, end, _) = wal.read_record_at(offset).unwrap();
        assert_eq!(read, second);
        assert_eq!(end, wal.size().unwrap());
    }

    #[test]
    fn last_record_on_empty_log_is_none() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();
        assert!(wal.last_record().unwrap().is_none());
    }

    #[test]
    fn last_record_returns_trailing_entry() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"a", b"1")).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &set(b"b", b"2")).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &del(b"a", b"1")).unwrap();

        assert_eq!(wal.last_record().unwrap(), Some(del(b"a", b"1")));
    }

    // -------------------- Rewrite protocols --------------------

    #[test]
    fn update_watermark_retires_every_record() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"a", b"1")).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &set(b"b", b"2")).unwrap();
        wal.update_watermark().unwrap();

        let size = wal.size().unwrap();
        let mut offset = 0;
        let mut count = 0;
        while offset < size {
            let (_, next, watermark) = wal.read_record_at(offset).unwrap();
            assert_eq!(watermark, WATERMARK_RETIRED);
            offset = next;
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn update_watermark_leaves_no_sibling_behind() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"a", b"1")).unwrap();
        wal.update_watermark().unwrap();

        assert!(!dir.path().join(SIBLING_FILE_NAME).exists());
    }

    #[test]
    fn appends_still_work_after_seal() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_PLACEHOLDER, &set(b"a", b"1")).unwrap();
        wal.update_watermark().unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &set(b"b", b"2")).unwrap();

        assert_eq!(wal.last_record().unwrap(), Some(set(b"b", b"2")));
    }

    #[test]
    fn clear_keeps_only_live_records() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();

        wal.append(WATERMARK_RETIRED, &set(b"flushed", b"1")).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &set(b"live", b"2")).unwrap();
        wal.append(WATERMARK_RETIRED, &del(b"flushed", b"1")).unwrap();
        wal.clear().unwrap();

        let (record, next, watermark) = wal.read_record_at(0).unwrap();
        assert_eq!(record, set(b"live", b"2"));
        assert_eq!(watermark, WATERMARK_PLACEHOLDER);
        assert_eq!(next, wal.size().unwrap());
    }

    #[test]
    fn clear_drops_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        {
            let mut wal = Wal::open(&path, false).unwrap();
            wal.append(WATERMARK_PLACEHOLDER, &set(b"good", b"value"))
                .unwrap();
        }

        let intact = std::fs::read(&path).unwrap();
        let mut torn = intact.clone();
        torn.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, b'D', b'E']);
        std::fs::write(&path, &torn).unwrap();

        let mut wal = Wal::open(&path, false).unwrap();
        wal.clear().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), intact);
    }

    #[test]
    fn clear_on_empty_log_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), false).unwrap();
        wal.clear().unwrap();
        assert_eq!(wal.size().unwrap(), 0);
    }

    // -------------------- Malformed input --------------------

    #[test]
    fn invalid_watermark_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        std::fs::write(&path, [0xFF, 0xFF, 0xFF, 0xFF, b'S', b'E', b'T']).unwrap();

        let mut wal = Wal::open(&path, false).unwrap();
        assert!(matches!(
            wal.read_record_at(0),
            Err(WalError::InvalidWatermark(0xFFFF_FFFF))
        ));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(b"XXX");
        bytes.extend_from_slice(&[0, 0, 0, 1, b'k', 0, 0, 0, 1, b'v']);
        std::fs::write(&path, bytes).unwrap();

        let mut wal = Wal::open(&path, false).unwrap();
        assert!(matches!(
            wal.read_record_at(0),
            Err(WalError::UnknownOperation(_))
        ));
    }

    #[test]
    fn truncated_tail_reads_as_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.bin");
        {
            let mut wal = Wal::open(&path, false).unwrap();
            wal.append(WATERMARK_PLACEHOLDER, &set(b"key", b"value"))
                .unwrap();
        }

        // Chop off the last few bytes, as a crash mid-append would.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let mut wal = Wal::open(&path, false).unwrap();
        let err = wal.read_record_at(0).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn sync_mode_append_succeeds() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.bin"), true).unwrap();
        wal.append(WATERMARK_PLACEHOLDER, &set(b"k", b"v")).unwrap();
        assert_eq!(wal.last_record().unwrap(), Some(set(b"k", b"v")));
    }
}
