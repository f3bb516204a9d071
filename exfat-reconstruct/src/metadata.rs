//! Synthesis and writeback of a fresh ExFAT metadata region: boot region,
//! FAT, allocation bitmap, upcase table, and root directory. Built entirely
//! in memory first so `write_to` can be a handful of contiguous copies and
//! `init` can be re-run to compare byte-identical results (idempotence,
//! spec property 8).

use exfat_core::entry::{
    BitmapEntry, UpcaseEntry, VolumeGuidEntry, VolumeLabelEntry, BOOT_SECTOR_SIZE,
    VOLUME_FLAG_DIRTY,
};
use exfat_core::{checksum, BootSector, RecoveryError, VolumeGeometry};
use exfat_volume::VolumeAccessor;

/// Sectors occupied by the main boot region: boot sector, 8 extended boot
/// sectors, OEM parameters, reserved, checksum sector.
pub const BOOT_REGION_SECTORS: u32 = 12;
pub const BITMAP_CLUSTER: u32 = 2;
pub const ROOT_DIRECTORY_CLUSTER: u32 = 3;
pub const UPCASE_FIRST_CLUSTER: u32 = 4;

pub struct MetadataImage {
    pub boot_sector: BootSector,
    pub fat: Vec<u8>,
    pub bitmap: Vec<u8>,
    pub upcase_table: Vec<u8>,
    pub root_directory: Vec<u8>,
}

impl MetadataImage {
    /// Builds a fresh in-memory metadata region for `geometry`. `volume_guid`
    /// and `volume_label` populate the corresponding root directory entries.
    pub fn init(
        geometry: &VolumeGeometry,
        volume_guid: [u8; 16],
        volume_label: &str,
    ) -> Result<Self, RecoveryError> {
        let sector_size = geometry.sector_size;
        let sectors_per_cluster = geometry.sectors_per_cluster;
        let cluster_bytes = geometry.cluster_bytes();

        let bytes_per_sector_shift = sector_size.trailing_zeros() as u8;
        let sectors_per_cluster_shift = sectors_per_cluster.trailing_zeros() as u8;

        let cluster_count = geometry.cluster_count();
        let upcase_table = build_upcase_table();
        let upcase_clusters = (upcase_table.len() as u64).div_ceil(cluster_bytes) as u32;

        let fat_entry_count = cluster_count as u64 + 2;
        let fat_bytes_len = fat_entry_count * 4;
        let fat_sectors = fat_bytes_len.div_ceil(sector_size as u64) as u32;
        // FAT follows the main boot region *and* its backup copy.
        let fat_offset_sectors = 2 * BOOT_REGION_SECTORS;

        // Heap begins immediately after the FAT; the bitmap, root
        // directory, and upcase table occupy its first few clusters.
        let cluster_heap_offset_sectors = fat_offset_sectors + fat_sectors;

        let boot_sector = BootSector {
            partition_offset: geometry.partition_first_sector,
            volume_length_sectors: geometry.total_sectors,
            fat_offset_sectors,
            fat_length_sectors: fat_sectors,
            cluster_heap_offset_sectors,
            cluster_count,
            first_cluster_of_root: ROOT_DIRECTORY_CLUSTER,
            volume_serial_number: 0,
            file_system_revision: 0x0100,
            volume_flags: VOLUME_FLAG_DIRTY,
            bytes_per_sector_shift,
            sectors_per_cluster_shift,
            number_of_fats: 1,
            percent_used: 100,
        };

        let fat = build_fat(fat_entry_count as usize, upcase_clusters);
        let bitmap = build_bitmap_all_allocated(cluster_count);
        let upcase_checksum = checksum::upcase_checksum(&upcase_table);

        let root_directory = build_root_directory(
            cluster_bytes as usize,
            &upcase_table,
            upcase_checksum,
            &bitmap,
            volume_guid,
            volume_label,
        )?;

        Ok(Self {
            boot_sector,
            fat,
            bitmap,
            upcase_table,
            root_directory,
        })
    }

    /// The main boot region: boot sector, zeroed extended sectors, and a
    /// checksum sector filled with the VBR checksum repeated to capacity.
    pub fn boot_region_bytes(&self) -> Vec<u8> {
        let sector_size = self.boot_sector.sector_size() as usize;
        let mut out = vec![0u8; BOOT_REGION_SECTORS as usize * sector_size];
        out[..BOOT_SECTOR_SIZE].copy_from_slice(&self.boot_sector.encode());

        let checksum_region = 11 * sector_size;
        let checksum = checksum::vbr_checksum(&out[..checksum_region]);
        let checksum_bytes = checksum.to_le_bytes();
        for chunk in out[checksum_region..checksum_region + sector_size].chunks_mut(4) {
            chunk.copy_from_slice(&checksum_bytes);
        }
        out
    }

    /// Writes the whole image to `volume`: boot region (main + backup copy),
    /// FAT, and root directory cluster. Idempotent — the same image written
    /// twice produces byte-identical regions.
    pub fn write_to(&self, volume: &mut VolumeAccessor) -> Result<(), RecoveryError> {
        let geometry = *volume.geometry();
        let boot_region = self.boot_region_bytes();
        let sector_size = geometry.sector_size as u64;

        // Cluster offsets must be derived from the boot sector this image
        // just synthesized, not from whatever the caller's geometry happens
        // to carry — the two can disagree (e.g. on `init`, the caller's
        // geometry reflects a stale or absent prior filesystem).
        let heap_geometry = VolumeGeometry {
            cluster_heap_start_sector: self.boot_sector.cluster_heap_offset_sectors as u64,
            ..geometry
        };

        let partition_start = geometry.partition_start() as usize;
        let backup_start = partition_start + boot_region.len();
        let fat_start =
            partition_start + (self.boot_sector.fat_offset_sectors as u64 * sector_size) as usize;
        let bitmap_offset = heap_geometry.cluster_to_offset(BITMAP_CLUSTER)? as usize;
        let root_offset = heap_geometry.cluster_to_offset(ROOT_DIRECTORY_CLUSTER)? as usize;
        let upcase_offset = heap_geometry.cluster_to_offset(UPCASE_FIRST_CLUSTER)? as usize;

        let bytes = volume.as_bytes_mut().ok_or_else(|| {
            RecoveryError::WritebackFailed("volume not opened writable".into())
        })?;

        write_region(bytes, partition_start, &boot_region)?;
        write_region(bytes, backup_start, &boot_region)?;
        write_region(bytes, fat_start, &self.fat)?;
        write_region(bytes, bitmap_offset, &self.bitmap)?;
        write_region(bytes, root_offset, &self.root_directory)?;
        write_region(bytes, upcase_offset, &self.upcase_table)?;

        volume.sync()
    }
}

fn write_region(bytes: &mut [u8], start: usize, region: &[u8]) -> Result<(), RecoveryError> {
    let end = start
        .checked_add(region.len())
        .ok_or_else(|| RecoveryError::WritebackFailed("region overflow".into()))?;
    let dest = bytes
        .get_mut(start..end)
        .ok_or_else(|| RecoveryError::WritebackFailed("region outside volume".into()))?;
    dest.copy_from_slice(region);
    Ok(())
}

/// Identity table over the whole UTF-16 BMP, with ASCII and Latin-1
/// lowercase letters mapped to their uppercase code point.
fn build_upcase_table() -> Vec<u8> {
    let mut table = vec![0u16; 0x1_0000];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u16;
    }
    for c in 0x0061u16..=0x007A {
        table[c as usize] = c - 0x20;
    }
    for c in 0x00E0u16..=0x00FE {
        if c == 0x00D7 || c == 0x00F7 {
            continue;
        }
        table[c as usize] = c - 0x20;
    }
    let mut bytes = Vec::with_capacity(table.len() * 2);
    for unit in table {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// A conservative FAT: bitmap, root directory, and upcase table each occupy
/// a terminated single- or multi-cluster chain; every remaining cluster is
/// marked as its own terminated chain so a future mount never reclaims space
/// that may still hold unrecovered file data.
fn build_fat(entry_count: usize, upcase_clusters: u32) -> Vec<u8> {
    const END_OF_CHAIN: u32 = 0xFFFF_FFFF;
    let mut fat = vec![0u32; entry_count];
    fat[0] = 0xFFFF_FFF8;
    fat[1] = 0xFFFF_FFFF;
    if entry_count > BITMAP_CLUSTER as usize {
        fat[BITMAP_CLUSTER as usize] = END_OF_CHAIN;
    }
    if entry_count > ROOT_DIRECTORY_CLUSTER as usize {
        fat[ROOT_DIRECTORY_CLUSTER as usize] = END_OF_CHAIN;
    }
    for c in UPCASE_FIRST_CLUSTER..UPCASE_FIRST_CLUSTER + upcase_clusters {
        if (c as usize) >= entry_count {
            break;
        }
        let next = c + 1;
        fat[c as usize] = if next < UPCASE_FIRST_CLUSTER + upcase_clusters {
            next
        } else {
            END_OF_CHAIN
        };
    }
    for (i, entry) in fat
        .iter_mut()
        .enumerate()
        .skip((UPCASE_FIRST_CLUSTER + upcase_clusters) as usize)
    {
        let _ = i;
        *entry = END_OF_CHAIN;
    }
    let mut bytes = Vec::with_capacity(fat.len() * 4);
    for entry in fat {
        bytes.extend_from_slice(&entry.to_le_bytes());
    }
    bytes
}

fn build_bitmap_all_allocated(cluster_count: u32) -> Vec<u8> {
    vec![0xFFu8; (cluster_count as usize).div_ceil(8)]
}

fn build_root_directory(
    cluster_bytes: usize,
    upcase_table: &[u8],
    upcase_checksum: u32,
    bitmap: &[u8],
    volume_guid: [u8; 16],
    volume_label: &str,
) -> Result<Vec<u8>, RecoveryError> {
    let mut root = vec![0u8; cluster_bytes];
    let mut cursor = 0usize;

    let label_units: Vec<u16> = volume_label.encode_utf16().take(11).collect();
    let mut label = [0u16; 11];
    label[..label_units.len()].copy_from_slice(&label_units);
    let label_entry = VolumeLabelEntry {
        character_count: label_units.len() as u8,
        label,
    };
    root[cursor..cursor + 32].copy_from_slice(&label_entry.encode());
    cursor += 32;

    let bitmap_entry = BitmapEntry {
        first_cluster: BITMAP_CLUSTER,
        data_length: bitmap.len() as u64,
    };
    root[cursor..cursor + 32].copy_from_slice(&bitmap_entry.encode());
    cursor += 32;

    let upcase_entry = UpcaseEntry {
        table_checksum: upcase_checksum,
        first_cluster: UPCASE_FIRST_CLUSTER,
        data_length: upcase_table.len() as u64,
    };
    root[cursor..cursor + 32].copy_from_slice(&upcase_entry.encode());
    cursor += 32;

    let guid_entry = VolumeGuidEntry {
        set_checksum: 0,
        guid: volume_guid,
    };
    root[cursor..cursor + 32].copy_from_slice(&guid_entry.encode());
    // cursor += 32; remainder of the cluster stays zeroed (end-of-directory).

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> VolumeGeometry {
        VolumeGeometry {
            sector_size: 512,
            sectors_per_cluster: 8,
            total_sectors: 200_000,
            partition_first_sector: 0,
            cluster_heap_start_sector: BOOT_REGION_SECTORS as u64,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let geometry = geometry();
        let a = MetadataImage::init(&geometry, [1u8; 16], "RECOVERED").unwrap();
        let b = MetadataImage::init(&geometry, [1u8; 16], "RECOVERED").unwrap();
        assert_eq!(a.boot_region_bytes(), b.boot_region_bytes());
        assert_eq!(a.fat, b.fat);
        assert_eq!(a.root_directory, b.root_directory);
    }

    #[test]
    fn boot_region_checksum_sector_is_repeated_value() {
        let image = MetadataImage::init(&geometry(), [0u8; 16], "LABEL").unwrap();
        let region = image.boot_region_bytes();
        let sector_size = image.boot_sector.sector_size() as usize;
        let checksum_sector = &region[11 * sector_size..12 * sector_size];
        let first = u32::from_le_bytes(checksum_sector[0..4].try_into().unwrap());
        assert!(checksum_sector
            .chunks(4)
            .all(|c| u32::from_le_bytes(c.try_into().unwrap()) == first));
    }

    #[test]
    fn upcase_table_maps_lowercase_ascii_to_uppercase() {
        let image = MetadataImage::init(&geometry(), [0u8; 16], "LABEL").unwrap();
        let a_index = b'a' as usize * 2;
        let mapped = u16::from_le_bytes([
            image.upcase_table[a_index],
            image.upcase_table[a_index + 1],
        ]);
        assert_eq!(mapped, b'A' as u16);
    }

    #[test]
    fn fat_does_not_overlap_backup_boot_region() {
        let image = MetadataImage::init(&geometry(), [0u8; 16], "LABEL").unwrap();
        let backup_start = BOOT_REGION_SECTORS;
        let backup_end = backup_start + BOOT_REGION_SECTORS;
        assert_eq!(image.boot_sector.fat_offset_sectors, backup_end);
    }

    #[test]
    fn cluster_heap_starts_after_fat() {
        let image = MetadataImage::init(&geometry(), [0u8; 16], "LABEL").unwrap();
        let fat_sectors = (image.fat.len() as u64).div_ceil(512) as u32;
        assert_eq!(
            image.boot_sector.cluster_heap_offset_sectors,
            image.boot_sector.fat_offset_sectors + fat_sectors
        );
    }

    #[test]
    fn write_to_preserves_backup_boot_region_and_does_not_overlap_fat() {
        use exfat_volume::VolumeAccessor;
        use std::io::Write as _;

        let geometry = geometry();
        let image = MetadataImage::init(&geometry, [7u8; 16], "RECOVERED").unwrap();

        // Volume geometry as the caller (e.g. a bare, never-formatted
        // device) would supply it — deliberately not matching the image's
        // own derived cluster heap offset, to prove write_to doesn't rely
        // on that agreement.
        let device_len = geometry.device_byte_len().max(
            (image.boot_sector.cluster_heap_offset_sectors as u64 + 64) * 512,
        );
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; device_len as usize]).unwrap();
        tmp.flush().unwrap();

        let mut volume = VolumeAccessor::open(tmp.path(), geometry, true).unwrap();
        image.write_to(&mut volume).unwrap();

        let bytes = volume.as_bytes();
        let boot_region = image.boot_region_bytes();
        let backup_start = boot_region.len();
        let fat_start = image.boot_sector.fat_offset_sectors as usize * 512;

        assert_eq!(&bytes[..boot_region.len()], &boot_region[..]);
        assert_eq!(
            &bytes[backup_start..backup_start + boot_region.len()],
            &boot_region[..],
            "FAT writeback must not clobber the backup boot region"
        );
        assert_eq!(
            &bytes[fat_start..fat_start + image.fat.len()],
            &image.fat[..]
        );
    }
}
