//! A `serde_json`-lines backed [`ReconciliationStore`]: every write appends
//! one JSON line; the whole file is replayed into an in-memory map on open.
//! Sufficient for tests and for recovery runs that don't need concurrent
//! access to the bookkeeping file.

use crate::{EntityRecord, ReconciliationStore, Relocation};
use exfat_core::{ByteOffset, RecoveryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind")]
enum StoreEvent {
    Entity(EntityRecord),
    Relocation(Relocation),
}

pub struct FlatFileStore {
    path: PathBuf,
    file: File,
    entities: BTreeMap<ByteOffset, EntityRecord>,
    relocations: BTreeMap<ByteOffset, ByteOffset>,
}

impl FlatFileStore {
    /// Opens (creating if absent) the bookkeeping file at `path` and replays
    /// its existing events into memory.
    pub fn open(path: &Path) -> Result<Self, RecoveryError> {
        let mut entities = BTreeMap::new();
        let mut relocations = BTreeMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line)? {
                    StoreEvent::Entity(record) => {
                        entities.insert(record.offset, record);
                    }
                    StoreEvent::Relocation(relocation) => {
                        relocations.insert(relocation.offset, relocation.new_offset);
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entities,
            relocations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, event: &StoreEvent) -> Result<(), RecoveryError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn get(&self, offset: ByteOffset) -> Option<&EntityRecord> {
        self.entities.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl ReconciliationStore for FlatFileStore {
    fn upsert_entity(&mut self, record: EntityRecord) -> Result<(), RecoveryError> {
        self.append(&StoreEvent::Entity(record.clone()))?;
        self.entities.insert(record.offset, record);
        Ok(())
    }

    fn upsert_relocation(&mut self, relocation: Relocation) -> Result<(), RecoveryError> {
        self.append(&StoreEvent::Relocation(relocation))?;
        self.relocations.insert(relocation.offset, relocation.new_offset);
        Ok(())
    }

    fn iter_orphan_dirs(&self) -> Result<Vec<ByteOffset>, RecoveryError> {
        Ok(self
            .entities
            .values()
            .filter(|r| r.is_directory && r.parent.is_none())
            .map(|r| r.offset)
            .collect())
    }

    fn mark_copied(&mut self, offset: ByteOffset) -> Result<(), RecoveryError> {
        let record = self
            .entities
            .get(&offset)
            .cloned()
            .ok_or_else(|| RecoveryError::LogParse(format!("no entity record at {offset:#018x}")))?;
        let mut updated = record;
        updated.copied = true;
        self.upsert_entity(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: ByteOffset, is_directory: bool, parent: Option<ByteOffset>) -> EntityRecord {
        EntityRecord {
            offset,
            name: format!("e{offset}"),
            parent,
            is_directory,
            copied: false,
        }
    }

    #[test]
    fn upsert_and_reopen_replays_events() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        {
            let mut store = FlatFileStore::open(tmp.path()).unwrap();
            store.upsert_entity(record(100, false, Some(1))).unwrap();
            store.upsert_relocation(Relocation { offset: 100, new_offset: 200 }).unwrap();
        }
        let store = FlatFileStore::open(tmp.path()).unwrap();
        assert_eq!(store.get(100).unwrap().name, "e100");
        assert_eq!(store.relocations.get(&100), Some(&200));
    }

    #[test]
    fn iter_orphan_dirs_returns_parentless_directories() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = FlatFileStore::open(tmp.path()).unwrap();
        store.upsert_entity(record(10, true, None)).unwrap();
        store.upsert_entity(record(20, true, Some(5))).unwrap();
        store.upsert_entity(record(30, false, None)).unwrap();

        let orphans = store.iter_orphan_dirs().unwrap();
        assert_eq!(orphans, vec![10]);
    }

    #[test]
    fn mark_copied_updates_existing_record() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = FlatFileStore::open(tmp.path()).unwrap();
        store.upsert_entity(record(1, false, Some(0))).unwrap();
        store.mark_copied(1).unwrap();
        assert!(store.get(1).unwrap().copied);
    }

    #[test]
    fn mark_copied_unknown_offset_errors() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = FlatFileStore::open(tmp.path()).unwrap();
        assert!(store.mark_copied(999).is_err());
    }
}
