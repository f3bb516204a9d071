//! The 32-byte metadata-entry family: file directory entries, stream
//! extensions, file-name entries, allocation bitmap/upcase/volume-label/GUID
//! entries, and the boot sector. Each type decodes from and encodes to an
//! exact byte layout via [`crate::bytes`] rather than a packed-struct cast.

use crate::bytes::*;
use crate::error::{InvalidEntityKind, RecoveryError};
use bitflags::bitflags;

pub const ENTRY_SIZE: usize = 32;

pub const TYPE_ALLOCATION_BITMAP: u8 = 0x81;
pub const TYPE_UPCASE_TABLE: u8 = 0x82;
pub const TYPE_VOLUME_LABEL: u8 = 0x83;
pub const TYPE_FILE_DIRECTORY: u8 = 0x85;
pub const TYPE_VOLUME_GUID: u8 = 0xA0;
pub const TYPE_STREAM_EXTENSION: u8 = 0xC0;
pub const TYPE_FILE_NAME: u8 = 0xC1;
pub const TYPE_DELETED_FILE: u8 = 0x05;
pub const TYPE_DELETED_STREAM: u8 = 0x40;
pub const TYPE_DELETED_FILE_NAME: u8 = 0x41;
pub const TYPE_END_OF_DIRECTORY: u8 = 0x00;

pub const IN_USE_BIT: u8 = 0x80;

bitflags! {
    /// The stream extension entry's `GeneralSecondaryFlags` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamFlags: u8 {
        /// If unset, `first_cluster` and `size` are undefined.
        const ALLOCATION_POSSIBLE = 0x01;
        /// If set, the file occupies one contiguous cluster run with no FAT chain.
        const NO_FAT_CHAIN = 0x02;
    }
}

bitflags! {
    /// The file directory entry's attribute flags (a subset relevant to recovery).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u16 {
        const READ_ONLY = 0x0001;
        const HIDDEN = 0x0002;
        const SYSTEM = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE = 0x0020;
    }
}

/// A primary file directory entry (type 0x85). Opens an entity triple.
#[derive(Debug, Clone, Copy)]
pub struct FileDirectoryEntry {
    pub continuations: u8,
    pub set_checksum: u16,
    pub attributes: FileAttributes,
    pub create_timestamp: u32,
    pub last_modified_timestamp: u32,
    pub last_accessed_timestamp: u32,
}

impl FileDirectoryEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_FILE_DIRECTORY {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        let continuations = read_u8(buf, 1);
        if !(2..=18).contains(&continuations) {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadContinuationCount,
            });
        }
        Ok(Self {
            continuations,
            set_checksum: read_u16(buf, 2),
            attributes: FileAttributes::from_bits_truncate(read_u16(buf, 4)),
            create_timestamp: read_u32(buf, 8),
            last_modified_timestamp: read_u32(buf, 12),
            last_accessed_timestamp: read_u32(buf, 16),
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_FILE_DIRECTORY);
        write_u8(&mut buf, 1, self.continuations);
        write_u16(&mut buf, 2, self.set_checksum);
        write_u16(&mut buf, 4, self.attributes.bits());
        write_u32(&mut buf, 8, self.create_timestamp);
        write_u32(&mut buf, 12, self.last_modified_timestamp);
        write_u32(&mut buf, 16, self.last_accessed_timestamp);
        buf
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// The stream extension entry (type 0xC0), always the first secondary entry.
#[derive(Debug, Clone, Copy)]
pub struct StreamExtensionEntry {
    pub flags: StreamFlags,
    pub name_length: u8,
    pub name_hash: u16,
    pub valid_size: u64,
    pub first_cluster: u32,
    pub total_size: u64,
}

impl StreamExtensionEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_STREAM_EXTENSION {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        Ok(Self {
            flags: StreamFlags::from_bits_truncate(read_u8(buf, 1)),
            name_length: read_u8(buf, 3),
            name_hash: read_u16(buf, 4),
            valid_size: read_u64(buf, 8),
            first_cluster: read_u32(buf, 20),
            total_size: read_u64(buf, 24),
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_STREAM_EXTENSION);
        write_u8(&mut buf, 1, self.flags.bits());
        write_u8(&mut buf, 3, self.name_length);
        write_u16(&mut buf, 4, self.name_hash);
        write_u64(&mut buf, 8, self.valid_size);
        write_u32(&mut buf, 20, self.first_cluster);
        write_u64(&mut buf, 24, self.total_size);
        buf
    }

    pub fn alloc_possible(&self) -> bool {
        self.flags.contains(StreamFlags::ALLOCATION_POSSIBLE)
    }

    pub fn contiguous(&self) -> bool {
        self.flags.contains(StreamFlags::NO_FAT_CHAIN)
    }
}

/// A file-name secondary entry (type 0xC1), up to 15 UTF-16 code units.
#[derive(Debug, Clone, Copy)]
pub struct FileNameEntry {
    pub name: [u16; 15],
}

impl FileNameEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_FILE_NAME {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        let mut name = [0u16; 15];
        read_u16_array(buf, 2, 15, &mut name);
        Ok(Self { name })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_FILE_NAME);
        write_u16_array(&mut buf, 2, &self.name);
        buf
    }
}

/// The allocation bitmap entry (type 0x81).
#[derive(Debug, Clone, Copy)]
pub struct BitmapEntry {
    pub first_cluster: u32,
    pub data_length: u64,
}

impl BitmapEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_ALLOCATION_BITMAP {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        Ok(Self {
            first_cluster: read_u32(buf, 20),
            data_length: read_u64(buf, 24),
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_ALLOCATION_BITMAP);
        write_u32(&mut buf, 20, self.first_cluster);
        write_u64(&mut buf, 24, self.data_length);
        buf
    }
}

/// The upcase table entry (type 0x82).
#[derive(Debug, Clone, Copy)]
pub struct UpcaseEntry {
    pub table_checksum: u32,
    pub first_cluster: u32,
    pub data_length: u64,
}

impl UpcaseEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_UPCASE_TABLE {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        Ok(Self {
            table_checksum: read_u32(buf, 4),
            first_cluster: read_u32(buf, 20),
            data_length: read_u64(buf, 24),
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_UPCASE_TABLE);
        write_u32(&mut buf, 4, self.table_checksum);
        write_u32(&mut buf, 20, self.first_cluster);
        write_u64(&mut buf, 24, self.data_length);
        buf
    }
}

/// The volume label entry (type 0x83), up to 11 UTF-16 code units.
#[derive(Debug, Clone, Copy)]
pub struct VolumeLabelEntry {
    pub character_count: u8,
    pub label: [u16; 11],
}

impl VolumeLabelEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_VOLUME_LABEL {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        let character_count = read_u8(buf, 1);
        let mut label = [0u16; 11];
        read_u16_array(buf, 2, 11, &mut label);
        Ok(Self {
            character_count,
            label,
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_VOLUME_LABEL);
        write_u8(&mut buf, 1, self.character_count);
        write_u16_array(&mut buf, 2, &self.label);
        buf
    }
}

/// The volume GUID entry (type 0xA0).
#[derive(Debug, Clone, Copy)]
pub struct VolumeGuidEntry {
    pub set_checksum: u16,
    pub guid: [u8; 16],
}

impl VolumeGuidEntry {
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, RecoveryError> {
        if read_u8(buf, 0) != TYPE_VOLUME_GUID {
            return Err(RecoveryError::InvalidEntity {
                offset,
                kind: InvalidEntityKind::BadType,
            });
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&buf[6..22]);
        Ok(Self {
            set_checksum: read_u16(buf, 2),
            guid,
        })
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        write_u8(&mut buf, 0, TYPE_VOLUME_GUID);
        write_u16(&mut buf, 2, self.set_checksum);
        buf[6..22].copy_from_slice(&self.guid);
        buf
    }
}

pub const BOOT_SECTOR_SIZE: usize = 512;

/// The volume boot record (first sector of the boot region).
#[derive(Debug, Clone, Copy)]
pub struct BootSector {
    pub partition_offset: u64,
    pub volume_length_sectors: u64,
    pub fat_offset_sectors: u32,
    pub fat_length_sectors: u32,
    pub cluster_heap_offset_sectors: u32,
    pub cluster_count: u32,
    pub first_cluster_of_root: u32,
    pub volume_serial_number: u32,
    pub file_system_revision: u16,
    pub volume_flags: u16,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
    pub percent_used: u8,
}

pub const VOLUME_FLAG_ACTIVE_FAT: u16 = 0x0001;
pub const VOLUME_FLAG_DIRTY: u16 = 0x0002;
pub const VOLUME_FLAG_MEDIA_FAILURE: u16 = 0x0004;

pub const BOOT_SIGNATURE: &[u8; 8] = b"EXFAT   ";

impl BootSector {
    pub fn decode(buf: &[u8]) -> Result<Self, RecoveryError> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(RecoveryError::MappingFailed(
                "boot sector buffer too short".into(),
            ));
        }
        if &buf[3..11] != BOOT_SIGNATURE {
            return Err(RecoveryError::MappingFailed(
                "missing EXFAT signature".into(),
            ));
        }
        Ok(Self {
            partition_offset: read_u64(buf, 64),
            volume_length_sectors: read_u64(buf, 72),
            fat_offset_sectors: read_u32(buf, 80),
            fat_length_sectors: read_u32(buf, 84),
            cluster_heap_offset_sectors: read_u32(buf, 88),
            cluster_count: read_u32(buf, 92),
            first_cluster_of_root: read_u32(buf, 96),
            volume_serial_number: read_u32(buf, 100),
            file_system_revision: read_u16(buf, 104),
            volume_flags: read_u16(buf, 106),
            bytes_per_sector_shift: read_u8(buf, 108),
            sectors_per_cluster_shift: read_u8(buf, 109),
            number_of_fats: read_u8(buf, 110),
            percent_used: read_u8(buf, 112),
        })
    }

    pub fn encode(&self) -> [u8; BOOT_SECTOR_SIZE] {
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        buf[0] = 0xEB;
        buf[1] = 0x76;
        buf[2] = 0x90;
        buf[3..11].copy_from_slice(BOOT_SIGNATURE);
        write_u64(&mut buf, 64, self.partition_offset);
        write_u64(&mut buf, 72, self.volume_length_sectors);
        write_u32(&mut buf, 80, self.fat_offset_sectors);
        write_u32(&mut buf, 84, self.fat_length_sectors);
        write_u32(&mut buf, 88, self.cluster_heap_offset_sectors);
        write_u32(&mut buf, 92, self.cluster_count);
        write_u32(&mut buf, 96, self.first_cluster_of_root);
        write_u32(&mut buf, 100, self.volume_serial_number);
        write_u16(&mut buf, 104, self.file_system_revision);
        write_u16(&mut buf, 106, self.volume_flags);
        write_u8(&mut buf, 108, self.bytes_per_sector_shift);
        write_u8(&mut buf, 109, self.sectors_per_cluster_shift);
        write_u8(&mut buf, 110, self.number_of_fats);
        write_u8(&mut buf, 112, self.percent_used);
        buf[510] = 0x55;
        buf[511] = 0xAA;
        buf
    }

    pub fn sector_size(&self) -> u32 {
        1u32 << self.bytes_per_sector_shift
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1u32 << self.sectors_per_cluster_shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sizes_are_32_bytes() {
        let fde = FileDirectoryEntry {
            continuations: 2,
            set_checksum: 0,
            attributes: FileAttributes::empty(),
            create_timestamp: 0,
            last_modified_timestamp: 0,
            last_accessed_timestamp: 0,
        };
        assert_eq!(fde.encode().len(), ENTRY_SIZE);
    }

    #[test]
    fn boot_sector_round_trips() {
        let bs = BootSector {
            partition_offset: 2048,
            volume_length_sectors: 1_000_000,
            fat_offset_sectors: 128,
            fat_length_sectors: 64,
            cluster_heap_offset_sectors: 256,
            cluster_count: 10000,
            first_cluster_of_root: 3,
            volume_serial_number: 0xdead_beef,
            file_system_revision: 0x0100,
            volume_flags: VOLUME_FLAG_DIRTY,
            bytes_per_sector_shift: 9,
            sectors_per_cluster_shift: 3,
            number_of_fats: 1,
            percent_used: 100,
        };
        let encoded = bs.encode();
        let decoded = BootSector::decode(&encoded).unwrap();
        assert_eq!(decoded.partition_offset, bs.partition_offset);
        assert_eq!(decoded.cluster_count, bs.cluster_count);
        assert_eq!(decoded.sector_size(), 512);
        assert_eq!(decoded.sectors_per_cluster(), 8);
    }

    #[test]
    fn rejects_bad_primary_type() {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = 0x01;
        assert!(FileDirectoryEntry::decode(&buf, 0).is_err());
    }

    #[test]
    fn rejects_out_of_range_continuations() {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = TYPE_FILE_DIRECTORY;
        buf[1] = 1;
        assert!(matches!(
            FileDirectoryEntry::decode(&buf, 0),
            Err(RecoveryError::InvalidEntity {
                kind: InvalidEntityKind::BadContinuationCount,
                ..
            })
        ));
    }
}
