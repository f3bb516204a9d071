//! On-disk types, checksums, and error kinds for the exFAT recovery workspace.
//!
//! This crate has no I/O of its own — it is the format layer every other
//! crate in the workspace builds on.

pub mod bytes;
pub mod checksum;
pub mod entry;
pub mod error;
pub mod geometry;
pub mod name;

pub use entry::*;
pub use error::{InvalidEntityKind, RecoveryError};
pub use geometry::{ByteOffset, ClusterIndex, SectorOffset, VolumeGeometry};
