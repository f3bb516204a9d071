//! Textual log codec: UTF-8, newline-terminated, one record per line.
//!
//! ```text
//! FDE        ::= "FDE "        <16-hex offset> " " <utf-8 name>
//! BAD_SECTOR ::= "BAD_SECTOR " <16-hex offset>
//! ```
//!
//! Names may contain spaces; the first space after the offset delimits the
//! offset field and everything after it, up to the newline, is the name.

use crate::record::LogRecord;
use exfat_core::{ByteOffset, RecoveryError};
use std::io::{BufRead, BufReader, Read, Write};
use tracing::warn;

pub struct TextLogWriter<W: Write> {
    out: W,
}

impl<W: Write> TextLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_record(&mut self, record: &LogRecord) -> Result<(), RecoveryError> {
        match record {
            LogRecord::Entity { offset, name } => {
                writeln!(self.out, "FDE {:016x} {}", offset, name)?;
            }
            LogRecord::BadSector { offset } => {
                writeln!(self.out, "BAD_SECTOR {:016x}", offset)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RecoveryError> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct TextLogReader<R: Read> {
    lines: BufReader<R>,
}

impl<R: Read> TextLogReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner),
        }
    }

    /// Reads and parses every line, invoking `cb` for each successfully
    /// parsed record. Malformed lines are warned about and skipped, per the
    /// design's log-parse error handling policy (non-fatal).
    pub fn for_each_record(
        &mut self,
        mut cb: impl FnMut(LogRecord),
    ) -> Result<(), RecoveryError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.lines.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            match parse_line(trimmed) {
                Some(record) => cb(record),
                None => warn!(line = trimmed, "unknown textlog line format"),
            }
        }
        Ok(())
    }
}

fn parse_hex_offset(s: &str) -> Option<ByteOffset> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

fn parse_line(line: &str) -> Option<LogRecord> {
    if let Some(rest) = line.strip_prefix("FDE ") {
        let (offset_str, name) = match rest.split_once(' ') {
            Some((o, n)) => (o, n.to_string()),
            None => (rest, String::new()),
        };
        let offset = parse_hex_offset(offset_str)?;
        return Some(LogRecord::Entity { offset, name });
    }
    if let Some(rest) = line.strip_prefix("BAD_SECTOR ") {
        let offset = parse_hex_offset(rest.trim())?;
        return Some(LogRecord::BadSector { offset });
    }
    None
}
