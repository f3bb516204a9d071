//! Binary log codec: compact length-prefixed records for large partitions.
//!
//! ```text
//! record   ::= u64 offset | i32 length | byte[length] payload
//! bad sector: length = -1, no payload
//! entity:    length = 32 * (continuations + 1), payload = raw entry triple
//! ```
//!
//! Sizes are host-byte-order 64-bit unsigned offsets and 32-bit signed
//! lengths — the binary log is not a portable artifact and is only expected
//! to be consumed on the producing host.

use exfat_core::{ByteOffset, RecoveryError};
use std::io::{Read, Write};

pub const BAD_SECTOR_LENGTH: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryRecord {
    Entity { offset: ByteOffset, payload: Vec<u8> },
    BadSector { offset: ByteOffset },
}

pub struct BinaryLogWriter<W: Write> {
    out: W,
}

impl<W: Write> BinaryLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_bad_sector(&mut self, offset: ByteOffset) -> Result<(), RecoveryError> {
        self.out.write_all(&offset.to_ne_bytes())?;
        self.out.write_all(&BAD_SECTOR_LENGTH.to_ne_bytes())?;
        Ok(())
    }

    pub fn write_entity(&mut self, offset: ByteOffset, payload: &[u8]) -> Result<(), RecoveryError> {
        let length = i32::try_from(payload.len())
            .map_err(|_| RecoveryError::LogParse("entity payload too large".into()))?;
        self.out.write_all(&offset.to_ne_bytes())?;
        self.out.write_all(&length.to_ne_bytes())?;
        self.out.write_all(payload)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RecoveryError> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct BinaryLogReader<R: Read> {
    inner: R,
}

impl<R: Read> BinaryLogReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads every record until EOF, invoking `cb` for each.
    pub fn for_each_record(
        &mut self,
        mut cb: impl FnMut(BinaryRecord),
    ) -> Result<(), RecoveryError> {
        loop {
            let mut offset_buf = [0u8; 8];
            match self.inner.read_exact(&mut offset_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let offset = u64::from_ne_bytes(offset_buf);

            let mut length_buf = [0u8; 4];
            self.inner.read_exact(&mut length_buf)?;
            let length = i32::from_ne_bytes(length_buf);

            if length == BAD_SECTOR_LENGTH {
                cb(BinaryRecord::BadSector { offset });
                continue;
            }
            if length < 0 {
                return Err(RecoveryError::LogParse(format!(
                    "invalid binary record length {length} at offset {offset:#018x}"
                )));
            }
            let mut payload = vec![0u8; length as usize];
            self.inner.read_exact(&mut payload)?;
            cb(BinaryRecord::Entity { offset, payload });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entity_and_bad_sector() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut writer = BinaryLogWriter::new(&mut buf);
            writer.write_entity(0x1000, &[1, 2, 3, 4]).unwrap();
            writer.write_bad_sector(0x2000).unwrap();
        }

        let mut reader = BinaryLogReader::new(&buf[..]);
        let mut records = Vec::new();
        reader.for_each_record(|r| records.push(r)).unwrap();

        assert_eq!(
            records,
            vec![
                BinaryRecord::Entity {
                    offset: 0x1000,
                    payload: vec![1, 2, 3, 4]
                },
                BinaryRecord::BadSector { offset: 0x2000 },
            ]
        );
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&0x1000u64.to_ne_bytes());
        buf.extend_from_slice(&10i32.to_ne_bytes());
        buf.extend_from_slice(&[1, 2, 3]); // short payload
        let mut reader = BinaryLogReader::new(&buf[..]);
        let result = reader.for_each_record(|_| {});
        assert!(result.is_err());
    }
}
