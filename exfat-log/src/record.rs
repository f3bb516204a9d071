//! The shared record type produced by the scanning engine and consumed by
//! the reconstruction engine, independent of which log codec carried it.

use exfat_core::ByteOffset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A candidate file directory entry found at `offset`, with the name
    /// decoded at scan time (best-effort — a decode failure still yields a
    /// record, with an empty or partial name).
    Entity { offset: ByteOffset, name: String },
    /// A sector that failed to read during the scan sweep.
    BadSector { offset: ByteOffset },
}
