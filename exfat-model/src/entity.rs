//! The in-memory entity model: what a loaded file or directory looks like
//! once its on-disk triple has been decoded, independent of how it was
//! found (a live directory walk, a recovery log, or an orphan sweep).

use exfat_core::{ByteOffset, FileAttributes};

/// Fields common to both file and directory entities.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    /// Byte offset of the primary file directory entry. Unique across a
    /// session and used as the entity's key everywhere a parent or child
    /// needs to refer to it.
    pub offset: ByteOffset,
    pub name: String,
    /// Set if the name was truncated or contained a blacklisted code unit
    /// when decoded (spec boundary scenario B4).
    pub name_suspect: bool,
    pub attributes: FileAttributes,
    pub create_timestamp: u32,
    pub last_modified_timestamp: u32,
    pub last_accessed_timestamp: u32,
    /// The offset of the containing directory's own entity, or `None` until
    /// reconstruction resolves it (or adopts this entity into the synthesized
    /// root). Non-owning: resolved by looking the offset up in the session's
    /// [`crate::arena::EntityArena`], never a raw reference.
    pub parent: Option<ByteOffset>,
}

#[derive(Debug, Clone)]
pub struct FileData {
    pub meta: EntityMeta,
    pub first_cluster: u32,
    pub valid_size: u64,
    pub total_size: u64,
    pub contiguous: bool,
}

#[derive(Debug, Clone)]
pub struct DirectoryData {
    pub meta: EntityMeta,
    pub first_cluster: u32,
    /// The primary entry's continuation count, needed to locate where a
    /// `first_cluster == 0` directory's embedded children begin (immediately
    /// after its own triple).
    pub continuations: u8,
    /// The stream extension's `total_size`: how far a directory walk started
    /// at `first_cluster` may read before it must stop, regardless of
    /// whether a `0x00` end-of-directory marker was found first.
    pub size: u64,
    /// Offsets of this directory's children, in discovery order.
    pub children: Vec<ByteOffset>,
    /// True only for the single synthesized root created at the start of a
    /// reconstruction session; a real on-disk root directory entry is not
    /// itself scanned (the boot sector points to it directly).
    pub is_root: bool,
}

/// The maximum number of children a directory may own before it is
/// considered full and no longer a candidate for orphan adoption.
pub const MAX_CHILDREN: usize = 254;

impl DirectoryData {
    pub fn is_full(&self) -> bool {
        self.children.len() >= MAX_CHILDREN
    }

    pub fn add_child(&mut self, child_offset: ByteOffset) {
        if !self.children.contains(&child_offset) {
            self.children.push(child_offset);
        }
    }

    pub fn remove_child(&mut self, child_offset: ByteOffset) {
        self.children.retain(|&o| o != child_offset);
    }
}

#[derive(Debug, Clone)]
pub enum Entity {
    File(FileData),
    Directory(DirectoryData),
}

impl Entity {
    pub fn meta(&self) -> &EntityMeta {
        match self {
            Entity::File(f) => &f.meta,
            Entity::Directory(d) => &d.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        match self {
            Entity::File(f) => &mut f.meta,
            Entity::Directory(d) => &mut d.meta,
        }
    }

    pub fn offset(&self) -> ByteOffset {
        self.meta().offset
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Entity::Directory(_))
    }

    pub fn as_directory(&self) -> Option<&DirectoryData> {
        match self {
            Entity::Directory(d) => Some(d),
            Entity::File(_) => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryData> {
        match self {
            Entity::Directory(d) => Some(d),
            Entity::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileData> {
        match self {
            Entity::File(f) => Some(f),
            Entity::Directory(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(offset: ByteOffset) -> EntityMeta {
        EntityMeta {
            offset,
            name: format!("entry-{offset}"),
            name_suspect: false,
            attributes: FileAttributes::empty(),
            create_timestamp: 0,
            last_modified_timestamp: 0,
            last_accessed_timestamp: 0,
            parent: None,
        }
    }

    #[test]
    fn directory_is_full_at_max_children() {
        let mut dir = DirectoryData {
            meta: meta(0),
            first_cluster: 3,
            continuations: 0,
            size: 0,
            children: Vec::new(),
            is_root: false,
        };
        for i in 0..MAX_CHILDREN as u64 {
            dir.add_child(i + 1);
        }
        assert!(dir.is_full());
    }

    #[test]
    fn add_child_is_idempotent() {
        let mut dir = DirectoryData {
            meta: meta(0),
            first_cluster: 3,
            continuations: 0,
            size: 0,
            children: Vec::new(),
            is_root: false,
        };
        dir.add_child(10);
        dir.add_child(10);
        assert_eq!(dir.children, vec![10]);
    }

    #[test]
    fn remove_child_drops_exact_offset() {
        let mut dir = DirectoryData {
            meta: meta(0),
            first_cluster: 3,
            continuations: 0,
            size: 0,
            children: vec![10, 20, 30],
            is_root: false,
        };
        dir.remove_child(20);
        assert_eq!(dir.children, vec![10, 30]);
    }
}
