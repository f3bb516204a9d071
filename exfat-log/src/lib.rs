//! Recovery log codecs.
//!
//! The scanning engine emits a stream of [`record::LogRecord`]s as it sweeps
//! a partition; either codec in this crate can serialize that stream. The
//! text codec is human-inspectable and is what a scan pass writes by
//! default; the binary codec is smaller and faster to replay on large
//! partitions, and is produced from a text log via [`textlog_to_binlog`]
//! rather than written directly by the scanner.

pub mod binary;
pub mod record;
pub mod text;

pub use binary::{BinaryLogReader, BinaryLogWriter, BinaryRecord};
pub use record::LogRecord;
pub use text::{TextLogReader, TextLogWriter};

use exfat_core::RecoveryError;
use std::io::{Read, Write};

/// Converts a text log into a binary log, re-reading `volume` to capture the
/// raw entry-triple bytes at each recorded entity offset. Bad sector records
/// pass through unchanged; they carry no payload in either format.
///
/// `entity_len` determines how many bytes starting at an entity's offset make
/// up its payload (the primary entry plus its continuations) — callers
/// typically derive this from the continuation count in the primary entry
/// already present in `volume` at that offset.
pub fn textlog_to_binlog<R: Read, W: Write>(
    text_in: R,
    binary_out: W,
    volume: &[u8],
    entity_len: impl Fn(&[u8]) -> usize,
) -> Result<(), RecoveryError> {
    let mut reader = TextLogReader::new(text_in);
    let mut writer = BinaryLogWriter::new(binary_out);
    let mut conversion_err = None;

    reader.for_each_record(|record| {
        if conversion_err.is_some() {
            return;
        }
        let result = match record {
            LogRecord::BadSector { offset } => writer.write_bad_sector(offset),
            LogRecord::Entity { offset, .. } => {
                let start = offset as usize;
                if start >= volume.len() {
                    Err(RecoveryError::LogParse(format!(
                        "entity offset {offset:#018x} outside mapped volume"
                    )))
                } else {
                    let len = entity_len(&volume[start..]).min(volume.len() - start);
                    writer.write_entity(offset, &volume[start..start + len])
                }
            }
        };
        if let Err(e) = result {
            conversion_err = Some(e);
        }
    })?;

    if let Some(e) = conversion_err {
        return Err(e);
    }
    writer.flush()
}
