//! Error kinds shared across the recovery workspace.
//!
//! One variant per failure kind named in the design's error handling section.
//! Fatal kinds (device open/map/close, writeback) are expected to propagate to
//! the CLI dispatcher; the rest are recovered from locally by the scanning and
//! reconstruction passes.

use thiserror::Error;

/// The sub-kind of an [`RecoveryError::InvalidEntity`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidEntityKind {
    BadType,
    BadContinuationCount,
    BadChecksum,
    BadNameLength,
}

impl std::fmt::Display for InvalidEntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvalidEntityKind::BadType => "bad type",
            InvalidEntityKind::BadContinuationCount => "bad continuation count",
            InvalidEntityKind::BadChecksum => "bad checksum",
            InvalidEntityKind::BadNameLength => "bad name length",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("memory mapping failed: {0}")]
    MappingFailed(String),

    #[error("invalid entity at offset {offset:#018x}: {kind}")]
    InvalidEntity {
        offset: u64,
        kind: InvalidEntityKind,
    },

    #[error("invalid cluster index: {0}")]
    InvalidCluster(u32),

    #[error("file is non-contiguous: {0}")]
    NonContiguous(String),

    #[error("short write extracting {name}: wrote {wrote} of {expected} bytes")]
    ShortWrite {
        name: String,
        wrote: usize,
        expected: usize,
    },

    #[error("destination error: {0}")]
    DestinationError(#[from] std::io::Error),

    #[error("bad sector at offset {0:#018x}")]
    BadSector(u64),

    #[error("malformed log line: {0}")]
    LogParse(String),

    #[error("metadata writeback failed: {0}")]
    WritebackFailed(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RecoveryError {
    /// Whether this error is fatal for the whole session (per the design's
    /// propagation policy), versus recoverable-and-skip.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecoveryError::DeviceUnavailable(_)
                | RecoveryError::MappingFailed(_)
                | RecoveryError::WritebackFailed(_)
        )
    }

    /// Process exit code for this error when it surfaces to the CLI, per the
    /// verb exit-code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            RecoveryError::DeviceUnavailable(_) | RecoveryError::MappingFailed(_) => 2,
            RecoveryError::WritebackFailed(_) => 4,
            RecoveryError::DestinationError(_) => 5,
            _ => 1,
        }
    }
}
