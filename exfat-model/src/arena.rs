//! The session-scoped container that owns every loaded entity and resolves
//! parent/child links by offset lookup rather than by reference — a
//! generalization of a raw-pointer parent back-reference into something an
//! owning `BTreeMap` can hold safely.

use crate::entity::{DirectoryData, Entity, EntityMeta};
use exfat_core::{ByteOffset, FileAttributes, RecoveryError};
use std::collections::BTreeMap;

/// Sentinel offset for the synthesized root directory, which has no backing
/// on-disk primary entry of its own.
pub const ROOT_OFFSET: ByteOffset = ByteOffset::MAX;

pub struct EntityArena {
    entities: BTreeMap<ByteOffset, Entity>,
}

impl EntityArena {
    /// Creates an arena pre-populated with the synthesized root directory.
    pub fn new() -> Self {
        let root = Entity::Directory(DirectoryData {
            meta: EntityMeta {
                offset: ROOT_OFFSET,
                name: String::new(),
                name_suspect: false,
                attributes: FileAttributes::DIRECTORY,
                create_timestamp: 0,
                last_modified_timestamp: 0,
                last_accessed_timestamp: 0,
                parent: None,
            },
            first_cluster: 0,
            continuations: 0,
            size: 0,
            children: Vec::new(),
            is_root: true,
        });
        let mut entities = BTreeMap::new();
        entities.insert(ROOT_OFFSET, root);
        Self { entities }
    }

    pub fn root_offset(&self) -> ByteOffset {
        ROOT_OFFSET
    }

    pub fn get(&self, offset: ByteOffset) -> Option<&Entity> {
        self.entities.get(&offset)
    }

    pub fn get_mut(&mut self, offset: ByteOffset) -> Option<&mut Entity> {
        self.entities.get_mut(&offset)
    }

    pub fn contains(&self, offset: ByteOffset) -> bool {
        self.entities.contains_key(&offset)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ByteOffset, &Entity)> {
        self.entities.iter()
    }

    /// Inserts a newly decoded entity, keyed by its own offset. Returns the
    /// previous entity at that offset, if one existed (offset collisions
    /// should not occur within a single scan but are not treated as fatal
    /// here; the caller decides).
    pub fn insert(&mut self, entity: Entity) -> Option<Entity> {
        self.entities.insert(entity.offset(), entity)
    }

    /// Attaches `child_offset` under `parent_offset`, failing if the parent
    /// is a file, is unknown, or is already at capacity.
    pub fn add_child(
        &mut self,
        parent_offset: ByteOffset,
        child_offset: ByteOffset,
    ) -> Result<(), RecoveryError> {
        let parent = self
            .entities
            .get_mut(&parent_offset)
            .and_then(Entity::as_directory_mut)
            .ok_or_else(|| {
                RecoveryError::NonContiguous(format!(
                    "parent {parent_offset:#018x} is not a known directory"
                ))
            })?;
        if parent.is_full() {
            return Err(RecoveryError::NonContiguous(format!(
                "directory {parent_offset:#018x} is full"
            )));
        }
        parent.add_child(child_offset);
        if let Some(child) = self.entities.get_mut(&child_offset) {
            child.meta_mut().parent = Some(parent_offset);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent_offset: ByteOffset, child_offset: ByteOffset) {
        if let Some(parent) = self
            .entities
            .get_mut(&parent_offset)
            .and_then(Entity::as_directory_mut)
        {
            parent.remove_child(child_offset);
        }
    }

    /// Reparents every entity with no resolvable parent (or a parent offset
    /// that isn't itself a known directory) under the synthesized root.
    /// Returns the offsets adopted.
    pub fn adopt_orphans(&mut self) -> Vec<ByteOffset> {
        let orphans: Vec<ByteOffset> = self
            .entities
            .iter()
            .filter(|(&offset, entity)| {
                if offset == ROOT_OFFSET {
                    return false;
                }
                match entity.meta().parent {
                    None => true,
                    Some(parent_offset) => !self
                        .entities
                        .get(&parent_offset)
                        .is_some_and(Entity::is_directory),
                }
            })
            .map(|(&offset, _)| offset)
            .collect();

        for offset in &orphans {
            let _ = self.add_child(ROOT_OFFSET, *offset);
        }
        orphans
    }
}

impl Default for EntityArena {
    fn default() -> Self {
        Self::new()
    }
}
