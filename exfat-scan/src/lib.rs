//! The scanning engine: a heuristic linear sweep over a raw partition that
//! emits a textual log of plausible directory-entry triples and unreadable
//! sector ranges, without trusting the FAT or root directory (both are
//! assumed lost).

use exfat_core::{
    entry::{ENTRY_SIZE, TYPE_FILE_DIRECTORY, TYPE_FILE_NAME, TYPE_STREAM_EXTENSION},
    name::decode_name,
    FileNameEntry, RecoveryError, StreamExtensionEntry,
};
use exfat_log::{LogRecord, TextLogWriter};
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Size of the rolling read window.
pub const CHUNK_SIZE: usize = 1 << 20;
/// Minimum overlap carried into the lookahead so a triple starting near the
/// end of a chunk can still be verified without a second physical read.
pub const MIN_OVERLAP: usize = 96;
pub const SECTOR_SIZE: u64 = 512;
/// Largest possible triple: one primary entry plus 18 continuations.
const MAX_TRIPLE_BYTES: usize = ENTRY_SIZE * 19;

/// A random-access source of bytes that can fail to read a given range,
/// modeling the device-level read failures the scanner resyncs around.
/// `&[u8]` implements this unconditionally (used by the mmap-backed volume
/// accessor, which has already paid the cost of loading the whole device).
pub trait ChunkSource {
    fn len(&self) -> u64;
    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// actually read (less than `buf.len()` only at end of device), or an
    /// error if the read failed outright.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, RecoveryError>;
}

impl ChunkSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, RecoveryError> {
        if offset >= ChunkSource::len(self) {
            return Ok(0);
        }
        let available = (ChunkSource::len(self) - offset) as usize;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self[offset as usize..offset as usize + n]);
        Ok(n)
    }
}

/// A [`ChunkSource`] backed by direct, unbuffered reads against an open
/// device file, bypassing any memory mapping. A memory-mapped source can
/// only ever observe successful reads (a failing access raises `SIGBUS`
/// rather than returning an error through the mapping), so it can never
/// surface a real bad sector; reading the device file directly, sector by
/// sector, lets the OS's own I/O error for that sector reach us as a
/// `Result::Err` instead.
pub struct FileChunkSource {
    file: RefCell<File>,
    len: u64,
}

impl FileChunkSource {
    pub fn open(path: &Path) -> Result<Self, RecoveryError> {
        let file = File::open(path)
            .map_err(|e| RecoveryError::DeviceUnavailable(format!("{}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| RecoveryError::DeviceUnavailable(format!("{}: {e}", path.display())))?
            .len();
        Ok(Self {
            file: RefCell::new(file),
            len,
        })
    }
}

impl ChunkSource for FileChunkSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, RecoveryError> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| RecoveryError::BadSector(offset))?;
        file.read(buf).map_err(|_| RecoveryError::BadSector(offset))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub entities_found: u64,
    pub bad_sectors: u64,
    pub bytes_scanned: u64,
}

pub struct Scanner;

impl Scanner {
    /// Sweeps `source` end to end, writing a textual log of every plausible
    /// entity offset and bad sector range to `out`.
    pub fn scan<S, W>(source: &S, out: W) -> Result<ScanStats, RecoveryError>
    where
        S: ChunkSource + ?Sized,
        W: Write,
    {
        let mut writer = TextLogWriter::new(out);
        let total_len = source.len();
        let mut stats = ScanStats::default();
        let mut pos: u64 = 0;

        while pos < total_len {
            let lookahead = (MAX_TRIPLE_BYTES as u64).min(total_len - pos);
            let read_len = ((CHUNK_SIZE as u64).min(total_len - pos) + lookahead)
                .min(total_len - pos) as usize;
            let mut buf = vec![0u8; read_len];
            fill_with_resync(source, pos, &mut buf, &mut writer, &mut stats)?;

            let effective_chunk_len = (CHUNK_SIZE as u64).min(total_len - pos) as usize;
            let mut p = 0usize;
            while p < effective_chunk_len {
                match try_triple(&buf, p) {
                    Some(triple_len) => {
                        let offset = pos + p as u64;
                        let name = decode_triple_name(&buf[p..p + triple_len]);
                        writer.write_record(&LogRecord::Entity { offset, name })?;
                        stats.entities_found += 1;
                        p += triple_len - 1;
                    }
                    None => p += 1,
                }
            }
            pos += effective_chunk_len as u64;
        }

        stats.bytes_scanned = pos;
        writer.flush()?;
        debug!(?stats, "scan complete");
        Ok(stats)
    }
}

/// Fills `buf` from `source` starting at `offset`, resyncing at sector
/// granularity on a read failure: the failing sector is logged as bad and
/// left zeroed, and the read resumes at the next sector boundary.
fn fill_with_resync<S, W>(
    source: &S,
    offset: u64,
    buf: &mut [u8],
    writer: &mut TextLogWriter<W>,
    stats: &mut ScanStats,
) -> Result<(), RecoveryError>
where
    S: ChunkSource + ?Sized,
    W: Write,
{
    let mut filled = 0usize;
    while filled < buf.len() {
        let read_offset = offset + filled as u64;
        // Bounded to one sector at a time: a read spanning several sectors
        // could swallow a mid-range failure silently on a source that only
        // fails at a specific starting offset (and mirrors how a real
        // device read is retried sector by sector after an I/O error).
        let want = (buf.len() - filled).min(SECTOR_SIZE as usize);
        match source.read_at(read_offset, &mut buf[filled..filled + want]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => {
                let sector_offset = (read_offset / SECTOR_SIZE) * SECTOR_SIZE;
                warn!(offset = sector_offset, "bad sector, resyncing");
                writer.write_record(&LogRecord::BadSector {
                    offset: sector_offset,
                })?;
                stats.bad_sectors += 1;
                let resume_at = sector_offset + SECTOR_SIZE;
                let skip = resume_at.saturating_sub(read_offset) as usize;
                filled += skip.min(buf.len() - filled);
            }
        }
    }
    Ok(())
}

/// Checks whether a candidate primary entry at `buf[p..]` opens a
/// structurally valid triple (type markers, continuation count, checksum).
/// Returns the triple's total byte length on success.
fn try_triple(buf: &[u8], p: usize) -> Option<usize> {
    if buf.get(p).copied()? != TYPE_FILE_DIRECTORY {
        return None;
    }
    if buf.get(p + ENTRY_SIZE).copied()? != TYPE_STREAM_EXTENSION {
        return None;
    }
    if buf.get(p + 2 * ENTRY_SIZE).copied()? != TYPE_FILE_NAME {
        return None;
    }

    let continuations = *buf.get(p + 1)?;
    if !(2..=18).contains(&continuations) {
        return None;
    }

    let triple_len = ENTRY_SIZE * (continuations as usize + 1);
    let triple = buf.get(p..p + triple_len)?;

    let stored_checksum = u16::from_le_bytes([triple[2], triple[3]]);
    if exfat_core::checksum::set_checksum(triple) != stored_checksum {
        return None;
    }

    Some(triple_len)
}

/// Best-effort filename decode for a validated triple, for the log line.
/// Decode failures never fail the scan — an empty name is logged instead.
fn decode_triple_name(triple: &[u8]) -> String {
    let stream_offset = ENTRY_SIZE;
    let Ok(stream) = StreamExtensionEntry::decode(&triple[stream_offset..stream_offset + ENTRY_SIZE], 0)
    else {
        return String::new();
    };
    let continuations = triple[1] as usize;
    let name_entry_count = continuations.saturating_sub(1);
    let mut name_entries = Vec::with_capacity(name_entry_count);
    for i in 0..name_entry_count {
        let start = ENTRY_SIZE * (2 + i);
        let Some(chunk) = triple.get(start..start + ENTRY_SIZE) else {
            break;
        };
        if let Ok(entry) = FileNameEntry::decode(chunk, 0) {
            name_entries.push(entry);
        }
    }
    decode_name(&name_entries, stream.name_length as usize).name
}

#[cfg(test)]
mod tests {
    use super::*;
    use exfat_core::{
        checksum::set_checksum,
        entry::{FileAttributes, FileDirectoryEntry, TYPE_FILE_NAME},
        name::encode_name,
        StreamFlags,
    };

    fn build_triple(name: &str) -> Vec<u8> {
        let name_entries = encode_name(name);
        let continuations = 1 + name_entries.len() as u8;

        let fde = FileDirectoryEntry {
            continuations,
            set_checksum: 0,
            attributes: FileAttributes::empty(),
            create_timestamp: 0,
            last_modified_timestamp: 0,
            last_accessed_timestamp: 0,
        };
        let stream = StreamExtensionEntry {
            flags: StreamFlags::ALLOCATION_POSSIBLE | StreamFlags::NO_FAT_CHAIN,
            name_length: name.encode_utf16().count() as u8,
            name_hash: 0,
            valid_size: 4,
            first_cluster: 5,
            total_size: 4,
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&fde.encode());
        bytes.extend_from_slice(&stream.encode());
        for entry in &name_entries {
            bytes.extend_from_slice(&entry.encode());
        }
        debug_assert_eq!(bytes[2 * ENTRY_SIZE], TYPE_FILE_NAME);

        let checksum = set_checksum(&bytes);
        bytes[2] = (checksum & 0xFF) as u8;
        bytes[3] = (checksum >> 8) as u8;
        bytes
    }

    #[test]
    fn finds_single_entity_in_small_volume() {
        let mut volume = vec![0u8; 4096];
        let triple = build_triple("hello.txt");
        volume[100..100 + triple.len()].copy_from_slice(&triple);

        let mut log = Vec::new();
        let stats = Scanner::scan(volume.as_slice(), &mut log).unwrap();
        assert_eq!(stats.entities_found, 1);
        assert_eq!(stats.bad_sectors, 0);

        let text = String::from_utf8(log).unwrap();
        assert!(text.contains("FDE 0000000000000064 hello.txt"));
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut volume = vec![0u8; 4096];
        let mut triple = build_triple("corrupt.bin");
        triple[2] ^= 0xFF; // corrupt the stored checksum
        volume[0..triple.len()].copy_from_slice(&triple);

        let mut log = Vec::new();
        let stats = Scanner::scan(volume.as_slice(), &mut log).unwrap();
        assert_eq!(stats.entities_found, 0);
    }

    struct FlakySource {
        bytes: Vec<u8>,
        bad_range: std::ops::Range<u64>,
    }

    impl ChunkSource for FlakySource {
        fn len(&self) -> u64 {
            self.bytes.len() as u64
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, RecoveryError> {
            if self.bad_range.contains(&offset) {
                return Err(RecoveryError::BadSector(offset));
            }
            self.bytes.as_slice().read_at(offset, buf)
        }
    }

    #[test]
    fn file_chunk_source_reads_match_contents() {
        use std::io::Write as _;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let source = FileChunkSource::open(tmp.path()).unwrap();
        assert_eq!(source.len(), data.len() as u64);

        let mut buf = [0u8; 512];
        let n = source.read_at(1024, &mut buf).unwrap();
        assert_eq!(n, 512);
        assert_eq!(&buf[..], &data[1024..1536]);
    }

    #[test]
    fn file_chunk_source_reads_past_end_return_zero() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        tmp.write_all(&[0u8; 64]).unwrap();
        tmp.flush().unwrap();

        let source = FileChunkSource::open(tmp.path()).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(source.read_at(64, &mut buf).unwrap(), 0);
    }

    #[test]
    fn resyncs_past_bad_sector() {
        let mut bytes = vec![0u8; 4096];
        let triple = build_triple("after-bad.txt");
        bytes[2048..2048 + triple.len()].copy_from_slice(&triple);
        let source = FlakySource {
            bytes,
            bad_range: 512..1024,
        };

        let mut log = Vec::new();
        let stats = Scanner::scan(&source, &mut log).unwrap();
        assert_eq!(stats.bad_sectors, 1);
        assert_eq!(stats.entities_found, 1);

        let text = String::from_utf8(log).unwrap();
        assert!(text.contains("BAD_SECTOR 0000000000000200"));
    }
}
