//! The reconstruction engine: the second pass that turns a recorded offset
//! into a loaded entity, walks directory streams to find children, adopts
//! orphans into the synthesized root, and extracts or rewrites metadata.

use crate::metadata::MetadataImage;
use crate::session::SessionState;
use exfat_core::entry::{
    ENTRY_SIZE, TYPE_DELETED_FILE, TYPE_DELETED_FILE_NAME, TYPE_DELETED_STREAM,
    TYPE_END_OF_DIRECTORY, TYPE_FILE_DIRECTORY, TYPE_FILE_NAME, TYPE_STREAM_EXTENSION,
};
use exfat_core::name::decode_name;
use exfat_core::{
    checksum::set_checksum, ByteOffset, ClusterIndex, FileDirectoryEntry, FileNameEntry,
    RecoveryError, StreamExtensionEntry,
};
use exfat_model::{DirectoryData, Entity, EntityArena, EntityMeta, FileData, ROOT_OFFSET};
use exfat_store::{EntityRecord, ReconciliationStore};
use exfat_volume::VolumeAccessor;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{error, warn};

pub struct LoadStats {
    pub loaded: u64,
    pub rejected: u64,
}

pub struct ReconstructionEngine {
    volume: VolumeAccessor,
    arena: EntityArena,
    state: SessionState,
}

impl ReconstructionEngine {
    pub fn new(volume: VolumeAccessor) -> Self {
        Self {
            volume,
            arena: EntityArena::new(),
            state: SessionState::LogPersisted,
        }
    }

    pub fn arena(&self) -> &EntityArena {
        &self.arena
    }

    /// Loads every entity named by `offsets` (typically every `Entity`
    /// record replayed from a log, in file order), recursing into
    /// directories as they're discovered. Returns counts, not a hard
    /// failure — a rejected entity is logged and skipped (spec §7).
    pub fn load_all(&mut self, offsets: impl IntoIterator<Item = (ByteOffset, String)>) -> LoadStats {
        let mut stats = LoadStats {
            loaded: 0,
            rejected: 0,
        };
        for (offset, name) in offsets {
            if self.arena.contains(offset) {
                continue;
            }
            match self.load_entity(offset, &name) {
                Some(_) => stats.loaded += 1,
                None => stats.rejected += 1,
            }
        }
        self.state.advance(SessionState::Loaded).ok();
        stats
    }

    /// Loads a single entity at `offset`. On failure returns `None` and
    /// logs a warning; never propagates the error (spec §4.6 "load-one").
    pub fn load_entity(&mut self, offset: ByteOffset, suggested_name: &str) -> Option<ByteOffset> {
        match self.try_load_entity(offset, suggested_name) {
            Ok(offset) => Some(offset),
            Err(e) => {
                warn!(offset, error = %e, "rejecting invalid entity");
                None
            }
        }
    }

    fn try_load_entity(
        &mut self,
        offset: ByteOffset,
        suggested_name: &str,
    ) -> Result<ByteOffset, RecoveryError> {
        let bytes = self.volume.as_bytes();
        let primary = bytes
            .get(offset as usize..offset as usize + ENTRY_SIZE)
            .ok_or_else(|| RecoveryError::InvalidCluster(0))?;
        let fde = FileDirectoryEntry::decode(primary, offset)?;

        let triple_len = ENTRY_SIZE * (fde.continuations as usize + 1);
        let triple = bytes
            .get(offset as usize..offset as usize + triple_len)
            .ok_or(RecoveryError::InvalidEntity {
                offset,
                kind: exfat_core::InvalidEntityKind::BadType,
            })?;

        let stored_checksum = u16::from_le_bytes([triple[2], triple[3]]);
        if set_checksum(triple) != stored_checksum {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: exfat_core::InvalidEntityKind::BadChecksum,
            });
        }

        let stream = StreamExtensionEntry::decode(
            &triple[ENTRY_SIZE..2 * ENTRY_SIZE],
            offset + ENTRY_SIZE as u64,
        )?;

        let name_entry_count = fde.continuations as usize - 1;
        let mut name_entries = Vec::with_capacity(name_entry_count);
        for i in 0..name_entry_count {
            let start = ENTRY_SIZE * (2 + i);
            let chunk = &triple[start..start + ENTRY_SIZE];
            if chunk[0] == TYPE_FILE_NAME {
                name_entries.push(FileNameEntry::decode(chunk, offset + start as u64)?);
            }
        }
        let decoded = decode_name(&name_entries, stream.name_length as usize);
        let (name, name_suspect) = if decoded.name.is_empty() {
            (suggested_name.to_string(), true)
        } else {
            (decoded.name, decoded.suspect)
        };

        let meta = EntityMeta {
            offset,
            name,
            name_suspect,
            attributes: fde.attributes,
            create_timestamp: fde.create_timestamp,
            last_modified_timestamp: fde.last_modified_timestamp,
            last_accessed_timestamp: fde.last_accessed_timestamp,
            parent: None,
        };

        let is_directory = fde.is_directory();
        let entity = if is_directory {
            Entity::Directory(DirectoryData {
                meta,
                first_cluster: stream.first_cluster,
                continuations: fde.continuations,
                size: stream.total_size,
                children: Vec::new(),
                is_root: false,
            })
        } else {
            Entity::File(FileData {
                meta,
                first_cluster: stream.first_cluster,
                valid_size: stream.valid_size,
                total_size: stream.total_size,
                contiguous: stream.contiguous(),
            })
        };
        self.arena.insert(entity);

        if is_directory {
            self.load_directory(offset)?;
        }

        Ok(offset)
    }

    /// Walks a directory's entry stream looking for child primary entries,
    /// loading each one found and attaching it (spec §4.6 "load-directory").
    fn load_directory(&mut self, directory_offset: ByteOffset) -> Result<(), RecoveryError> {
        let (first_cluster, continuations, dir_size) = {
            let dir = self
                .arena
                .get(directory_offset)
                .and_then(Entity::as_directory)
                .expect("directory just inserted");
            (dir.first_cluster, dir.continuations, dir.size)
        };

        let mut cursor: ByteOffset = if first_cluster == 0 {
            directory_offset + ENTRY_SIZE as u64 * (continuations as u64 + 1)
        } else {
            self.volume.cluster_ptr(first_cluster as ClusterIndex)?
        };
        // A `first_cluster == 0` directory (embedded children right after
        // its own triple) has no declared size to bound the walk by; it
        // relies solely on the `0x00` terminator and the volume end.
        let limit = (first_cluster != 0).then_some(cursor + dir_size);
        let volume_len = self.volume.as_bytes().len() as u64;

        loop {
            if let Some(limit) = limit {
                if cursor >= limit {
                    break;
                }
            }
            if cursor + ENTRY_SIZE as u64 > volume_len {
                break;
            }
            let record_type = self.volume.as_bytes()[cursor as usize];
            match record_type {
                TYPE_FILE_DIRECTORY => {
                    let continuations = self.volume.as_bytes()[cursor as usize + 1];
                    let advance = if (2..=18).contains(&continuations) {
                        ENTRY_SIZE as u64 * (continuations as u64 + 1)
                    } else {
                        ENTRY_SIZE as u64
                    };
                    if let Some(child_offset) = self.load_entity(cursor, "noname") {
                        let _ = self.arena.add_child(directory_offset, child_offset);
                    }
                    cursor += advance;
                }
                TYPE_END_OF_DIRECTORY => break,
                TYPE_STREAM_EXTENSION
                | TYPE_FILE_NAME
                | TYPE_DELETED_FILE
                | TYPE_DELETED_STREAM
                | TYPE_DELETED_FILE_NAME => {
                    cursor += ENTRY_SIZE as u64;
                }
                other => {
                    warn!(offset = cursor, kind = other, "unrecognized directory record, skipping");
                    cursor += ENTRY_SIZE as u64;
                }
            }
        }
        Ok(())
    }

    /// Attaches every entity with no resolvable parent to the synthesized
    /// root (spec §4.6 "orphan adoption").
    pub fn adopt_orphans(&mut self) -> Vec<ByteOffset> {
        self.arena.adopt_orphans()
    }

    /// Upserts every loaded entity into an external reconciliation store.
    /// The engine never depends on a concrete store backend, only on this
    /// trait object.
    pub fn sync_store(&self, store: &mut dyn ReconciliationStore) -> Result<(), RecoveryError> {
        for (&offset, entity) in self.arena.iter() {
            if offset == ROOT_OFFSET {
                continue;
            }
            store.upsert_entity(EntityRecord {
                offset,
                name: entity.meta().name.clone(),
                parent: entity.meta().parent,
                is_directory: entity.is_directory(),
                copied: false,
            })?;
        }
        Ok(())
    }

    /// Builds and writes a fresh metadata region, replacing whatever the
    /// volume currently holds. Fatal on failure (spec §4.6, §7).
    pub fn write_metadata(
        &mut self,
        volume_guid: [u8; 16],
        volume_label: &str,
    ) -> Result<(), RecoveryError> {
        let geometry = *self.volume.geometry();
        let image = MetadataImage::init(&geometry, volume_guid, volume_label)?;
        image.write_to(&mut self.volume).map_err(|e| {
            error!(error = %e, "metadata writeback failed");
            e
        })?;
        self.state
            .advance(SessionState::MetadataWritten)
            .or_else(|_| self.state.advance(SessionState::Both))?;
        Ok(())
    }

    /// Walks the loaded model depth-first, streaming every contiguous file's
    /// bytes to `destination`. Non-contiguous files are reported and
    /// skipped; a failed file extraction aborts that file only (spec §4.6
    /// "Extraction", §7 failure semantics).
    pub fn restore_all(&mut self, destination: &Path) -> Result<ExtractionReport, RecoveryError> {
        let mut report = ExtractionReport::default();
        self.restore_directory(ROOT_OFFSET, destination, &mut report)?;
        self.state
            .advance(SessionState::Extracted)
            .or_else(|_| self.state.advance(SessionState::Both))?;
        Ok(report)
    }

    fn restore_directory(
        &mut self,
        directory_offset: ByteOffset,
        destination: &Path,
        report: &mut ExtractionReport,
    ) -> Result<(), RecoveryError> {
        fs::create_dir_all(destination)?;
        let children = self
            .arena
            .get(directory_offset)
            .and_then(Entity::as_directory)
            .map(|d| d.children.clone())
            .unwrap_or_default();

        for child_offset in children {
            let Some(entity) = self.arena.get(child_offset) else {
                continue;
            };
            let safe_name = exfat_core::name::sanitize_for_host_fs(&entity.meta().name);
            let child_path = destination.join(&safe_name);
            match entity {
                Entity::Directory(_) => {
                    self.restore_directory(child_offset, &child_path, report)?;
                }
                Entity::File(file) => {
                    if !file.contiguous {
                        warn!(offset = child_offset, name = %safe_name, "skipping non-contiguous file");
                        report.skipped_non_contiguous += 1;
                        continue;
                    }
                    match self.copy_file(file, &child_path) {
                        Ok(()) => report.extracted += 1,
                        Err(e) => {
                            warn!(offset = child_offset, name = %safe_name, error = %e, "extraction failed");
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn copy_file(&self, file: &FileData, destination: &Path) -> Result<(), RecoveryError> {
        const CHUNK: usize = 64 * 1024;
        let start = self.volume.cluster_ptr(file.first_cluster as ClusterIndex)? as usize;
        let size = file.total_size as usize;
        let bytes = self.volume.as_bytes();
        let source = bytes
            .get(start..start + size)
            .ok_or_else(|| RecoveryError::NonContiguous(format!("{destination:?} extends past volume")))?;

        let mut out = fs::File::create(destination)?;
        for chunk in source.chunks(CHUNK) {
            let wrote = out.write(chunk)?;
            if wrote != chunk.len() {
                return Err(RecoveryError::ShortWrite {
                    name: destination.display().to_string(),
                    wrote,
                    expected: chunk.len(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: u64,
    pub skipped_non_contiguous: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use exfat_core::entry::{FileAttributes, TYPE_FILE_NAME};
    use exfat_core::name::encode_name;
    use exfat_core::{StreamFlags, VolumeGeometry};
    use std::io::Write as _;

    fn geometry(total_sectors: u64) -> VolumeGeometry {
        VolumeGeometry {
            sector_size: 512,
            sectors_per_cluster: 8,
            total_sectors,
            partition_first_sector: 0,
            cluster_heap_start_sector: 16,
        }
    }

    fn build_file_triple(name: &str, first_cluster: u32, total_size: u64, contiguous: bool) -> Vec<u8> {
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
        let mut flags = StreamFlags::ALLOCATION_POSSIBLE;
        if contiguous {
            flags |= StreamFlags::NO_FAT_CHAIN;
        }
        let stream = StreamExtensionEntry {
            flags,
            name_length: name.encode_utf16().count() as u8,
            name_hash: 0,
            valid_size: total_size,
            first_cluster,
            total_size,
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&fde.encode());
        bytes.extend_from_slice(&stream.encode());
        for entry in &name_entries {
            bytes.extend_from_slice(&entry.encode());
        }
        debug_assert_eq!(bytes[64], TYPE_FILE_NAME);
        let checksum = set_checksum(&bytes);
        bytes[2] = (checksum & 0xFF) as u8;
        bytes[3] = (checksum >> 8) as u8;
        bytes
    }

    #[test]
    fn loads_single_file_entity() {
        let geometry = geometry(4096);
        let mut volume_bytes = vec![0u8; geometry.device_byte_len() as usize];
        let triple = build_file_triple("a.txt", 10, 4, true);
        let offset = 4096usize;
        volume_bytes[offset..offset + triple.len()].copy_from_slice(&triple);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &volume_bytes).unwrap();
        let volume = VolumeAccessor::open(tmp.path(), geometry, false).unwrap();
        let mut engine = ReconstructionEngine::new(volume);

        let loaded = engine.load_entity(offset as u64, "noname");
        assert_eq!(loaded, Some(offset as u64));
        let entity = engine.arena().get(offset as u64).unwrap();
        assert_eq!(entity.meta().name, "a.txt");
        assert!(!entity.is_directory());
    }

    #[test]
    fn rejects_entity_with_bad_checksum() {
        let geometry = geometry(4096);
        let mut volume_bytes = vec![0u8; geometry.device_byte_len() as usize];
        let mut triple = build_file_triple("bad.txt", 10, 4, true);
        triple[2] ^= 0xFF;
        let offset = 4096usize;
        volume_bytes[offset..offset + triple.len()].copy_from_slice(&triple);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &volume_bytes).unwrap();
        let volume = VolumeAccessor::open(tmp.path(), geometry, false).unwrap();
        let mut engine = ReconstructionEngine::new(volume);

        assert_eq!(engine.load_entity(offset as u64, "noname"), None);
    }

    #[test]
    fn adopt_orphans_attaches_to_root() {
        let geometry = geometry(4096);
        let mut volume_bytes = vec![0u8; geometry.device_byte_len() as usize];
        let triple = build_file_triple("orphan.txt", 10, 4, true);
        let offset = 4096usize;
        volume_bytes[offset..offset + triple.len()].copy_from_slice(&triple);

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &volume_bytes).unwrap();
        let volume = VolumeAccessor::open(tmp.path(), geometry, false).unwrap();
        let mut engine = ReconstructionEngine::new(volume);
        engine.load_entity(offset as u64, "noname");

        let adopted = engine.adopt_orphans();
        assert_eq!(adopted, vec![offset as u64]);
    }

    #[test]
    fn restore_all_extracts_contiguous_file_bytes() {
        let geometry = geometry(4096);
        let mut volume_bytes = vec![0u8; geometry.device_byte_len() as usize];
        let content = b"hello";
        let data_offset = geometry.cluster_to_offset(10).unwrap() as usize;
        volume_bytes[data_offset..data_offset + content.len()].copy_from_slice(content);
        let triple = build_file_triple("greeting.txt", 10, content.len() as u64, true);
        let entity_offset = 4096usize;
        volume_bytes[entity_offset..entity_offset + triple.len()].copy_from_slice(&triple);

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&volume_bytes).unwrap();
        tmp.flush().unwrap();
        let volume = VolumeAccessor::open(tmp.path(), geometry, false).unwrap();
        let mut engine = ReconstructionEngine::new(volume);
        engine.load_entity(entity_offset as u64, "noname");
        engine.adopt_orphans();

        let dest = tempfile::tempdir().unwrap();
        let report = engine.restore_all(dest.path()).unwrap();
        assert_eq!(report.extracted, 1);
        let written = std::fs::read(dest.path().join("greeting.txt")).unwrap();
        assert_eq!(written, content);
    }
}
