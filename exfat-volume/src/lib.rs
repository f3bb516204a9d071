//! Memory-mapped access to the raw partition image.
//!
//! This is the only component in the workspace that performs OS I/O; every
//! other crate addresses the volume through the flat byte range this crate
//! exposes. Scoped release (unmap + descriptor close) is guaranteed by
//! `Drop` on every exit path, including error propagation.

use exfat_core::{BootSector, ByteOffset, ClusterIndex, RecoveryError, VolumeGeometry};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Reads the volume boot record at the start of `device_path` and derives
/// the geometry the rest of the workspace needs. Used by verbs that must
/// address the cluster heap (`reconstruct`, `extract`, `init`); `scan`
/// addresses the device as a flat byte range and never calls this.
pub fn detect_geometry(device_path: &Path) -> Result<VolumeGeometry, RecoveryError> {
    let mut file = File::open(device_path)
        .map_err(|e| RecoveryError::DeviceUnavailable(format!("{}: {e}", device_path.display())))?;
    let mut sector = [0u8; exfat_core::entry::BOOT_SECTOR_SIZE];
    file.read_exact(&mut sector)
        .map_err(|e| RecoveryError::DeviceUnavailable(format!("{}: {e}", device_path.display())))?;
    let boot = BootSector::decode(&sector)?;
    Ok(VolumeGeometry {
        sector_size: boot.sector_size(),
        sectors_per_cluster: boot.sectors_per_cluster(),
        total_sectors: boot.volume_length_sectors,
        partition_first_sector: boot.partition_offset,
        cluster_heap_start_sector: boot.cluster_heap_offset_sectors as u64,
    })
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => &m[..],
            Mapping::ReadWrite(m) => &m[..],
        }
    }
}

/// A memory-mapped view of a raw partition image, opened read-only or
/// read-write for the life of a recovery session.
pub struct VolumeAccessor {
    _file: File,
    mapping: Mapping,
    geometry: VolumeGeometry,
}

impl VolumeAccessor {
    /// Opens `device_path` and maps the whole device. `writable` grants a
    /// read/write mapping with write-through durability on close (an explicit
    /// `flush()` before the mapping is dropped).
    pub fn open(
        device_path: &Path,
        geometry: VolumeGeometry,
        writable: bool,
    ) -> Result<Self, RecoveryError> {
        info!(path = %device_path.display(), writable, "opening volume");
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(device_path)
            .map_err(|e| RecoveryError::DeviceUnavailable(format!("{}: {e}", device_path.display())))?;

        let len = geometry.device_byte_len();
        let mapping = if writable {
            let mmap = unsafe {
                MmapOptions::new()
                    .len(len as usize)
                    .map_mut(&file)
                    .map_err(|e| RecoveryError::MappingFailed(e.to_string()))?
            };
            Mapping::ReadWrite(mmap)
        } else {
            let mmap = unsafe {
                MmapOptions::new()
                    .len(len as usize)
                    .map(&file)
                    .map_err(|e| RecoveryError::MappingFailed(e.to_string()))?
            };
            Mapping::ReadOnly(mmap)
        };

        Ok(Self {
            _file: file,
            mapping,
            geometry,
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// The whole mapped byte range.
    pub fn as_bytes(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    /// A mutable view of the mapping, if it was opened writable.
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadWrite(m) => Some(&mut m[..]),
            Mapping::ReadOnly(_) => None,
        }
    }

    pub fn partition_start(&self) -> ByteOffset {
        self.geometry.partition_start()
    }

    pub fn partition_end(&self) -> ByteOffset {
        self.geometry.partition_end()
    }

    /// Address of the start of cluster `i`. Requires `i >= 2`.
    pub fn cluster_ptr(&self, i: ClusterIndex) -> Result<ByteOffset, RecoveryError> {
        self.geometry.cluster_to_offset(i)
    }

    /// Flushes pending writes to the backing device. No-op on a read-only mapping.
    pub fn sync(&self) -> Result<(), RecoveryError> {
        if let Mapping::ReadWrite(m) = &self.mapping {
            m.flush().map_err(|e| RecoveryError::WritebackFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Explicitly releases the mapping and file descriptor. Also happens
    /// automatically on drop; exposed so callers can observe sync errors
    /// before the session ends (spec's scoped-release guarantee applies
    /// either way).
    pub fn close(mut self) -> Result<(), RecoveryError> {
        self.sync()?;
        debug!("volume closed");
        Ok(())
    }
}

impl Drop for VolumeAccessor {
    fn drop(&mut self) {
        if let Mapping::ReadWrite(m) = &self.mapping {
            let _ = m.flush();
        }
    }
}
