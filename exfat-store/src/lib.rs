//! A reconciliation store abstracts the external bookkeeping a recovery run
//! wants to keep alongside the volume itself: which entities were seen,
//! where a rewritten entity ended up, which directories never found a
//! parent, and which files have already been copied out. The reconstruction
//! engine depends only on the [`ReconciliationStore`] trait, never on a
//! concrete backend.

pub mod flat_file;
#[cfg(feature = "sql")]
pub mod sqlite;

pub use flat_file::FlatFileStore;
#[cfg(feature = "sql")]
pub use sqlite::SqliteStore;

use exfat_core::{ByteOffset, RecoveryError};
use serde::{Deserialize, Serialize};

/// Everything reconciliation needs to remember about one loaded entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub offset: ByteOffset,
    pub name: String,
    pub parent: Option<ByteOffset>,
    pub is_directory: bool,
    pub copied: bool,
}

/// Records that the entity originally at `offset` was rewritten (by a
/// metadata writeback pass) at `new_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Relocation {
    pub offset: ByteOffset,
    pub new_offset: ByteOffset,
}

/// A repository for recovery bookkeeping that outlives a single process
/// invocation, abstracting away whichever backend holds it.
pub trait ReconciliationStore {
    /// Records or updates an entity's bookkeeping row.
    fn upsert_entity(&mut self, record: EntityRecord) -> Result<(), RecoveryError>;

    /// Records that an entity moved to a new offset.
    fn upsert_relocation(&mut self, relocation: Relocation) -> Result<(), RecoveryError>;

    /// Offsets of every directory entity with no resolved parent.
    fn iter_orphan_dirs(&self) -> Result<Vec<ByteOffset>, RecoveryError>;

    /// Marks the entity at `offset` as copied to its destination.
    fn mark_copied(&mut self, offset: ByteOffset) -> Result<(), RecoveryError>;
}
