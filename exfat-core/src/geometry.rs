//! Fixed-width offset aliases and volume geometry arithmetic.
//!
//! Cluster numbering begins at 2 (exFAT §3.4): the heap holds no cluster 0 or 1.

use crate::error::RecoveryError;

/// A byte offset relative to the start of the underlying block device.
pub type ByteOffset = u64;

/// A sector index relative to the start of the partition.
pub type SectorOffset = u64;

/// A cluster index. Valid cluster indices start at 2.
pub type ClusterIndex = u32;

/// Immutable geometry of a volume for the life of a recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    /// Sector size in bytes. Power of two, 512..=4096.
    pub sector_size: u32,
    /// Sectors per cluster. Power of two; cluster_bytes() must be <= 32 MiB.
    pub sectors_per_cluster: u32,
    /// Total sectors in the partition.
    pub total_sectors: u64,
    /// First sector of the partition, relative to the underlying device.
    pub partition_first_sector: u64,
    /// Cluster heap start sector, relative to the partition.
    pub cluster_heap_start_sector: u64,
}

impl VolumeGeometry {
    /// Bytes per cluster.
    pub fn cluster_bytes(&self) -> u64 {
        self.sector_size as u64 * self.sectors_per_cluster as u64
    }

    /// Byte offset (relative to the device) at which the cluster heap begins.
    pub fn cluster_heap_byte_offset(&self) -> ByteOffset {
        (self.partition_first_sector + self.cluster_heap_start_sector) * self.sector_size as u64
    }

    /// Total cluster count in the heap.
    pub fn cluster_count(&self) -> u32 {
        (self.total_sectors / self.sectors_per_cluster as u64) as u32
    }

    /// Converts a cluster index (>= 2) to its absolute byte offset on the device.
    pub fn cluster_to_offset(&self, cluster: ClusterIndex) -> Result<ByteOffset, RecoveryError> {
        if cluster < 2 {
            return Err(RecoveryError::InvalidCluster(cluster));
        }
        let cluster_count = self.cluster_count();
        if cluster > cluster_count.saturating_add(1) {
            return Err(RecoveryError::InvalidCluster(cluster));
        }
        let cluster_ofs = (cluster - 2) as u64 * self.cluster_bytes();
        Ok(self.cluster_heap_byte_offset() + cluster_ofs)
    }

    /// Converts an absolute byte offset within the cluster heap back to its cluster index.
    /// Inverse of [`Self::cluster_to_offset`] for exact cluster-start offsets.
    pub fn offset_to_cluster(&self, offset: ByteOffset) -> Result<ClusterIndex, RecoveryError> {
        let heap_start = self.cluster_heap_byte_offset();
        if offset < heap_start {
            return Err(RecoveryError::InvalidCluster(0));
        }
        let delta = offset - heap_start;
        let cluster_bytes = self.cluster_bytes();
        if delta % cluster_bytes != 0 {
            return Err(RecoveryError::InvalidCluster(0));
        }
        let cluster = (delta / cluster_bytes) as u64 + 2;
        u32::try_from(cluster).map_err(|_| RecoveryError::InvalidCluster(u32::MAX))
    }

    /// Total addressable length of the underlying device, in bytes:
    /// `(total_sectors + partition_first_sector) * sector_size`.
    pub fn device_byte_len(&self) -> u64 {
        (self.total_sectors + self.partition_first_sector) * self.sector_size as u64
    }

    /// Byte offset of the first partition sector on the device.
    pub fn partition_start(&self) -> ByteOffset {
        self.partition_first_sector * self.sector_size as u64
    }

    /// Byte offset one past the last partition sector on the device.
    pub fn partition_end(&self) -> ByteOffset {
        self.partition_start() + self.total_sectors * self.sector_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> VolumeGeometry {
        VolumeGeometry {
            sector_size: 512,
            sectors_per_cluster: 8,
            total_sectors: 1_000_000,
            partition_first_sector: 2048,
            cluster_heap_start_sector: 0x8C400,
        }
    }

    #[test]
    fn cluster_to_offset_rejects_below_two() {
        assert!(matches!(
            geom().cluster_to_offset(0),
            Err(RecoveryError::InvalidCluster(0))
        ));
        assert!(matches!(
            geom().cluster_to_offset(1),
            Err(RecoveryError::InvalidCluster(1))
        ));
    }

    #[test]
    fn cluster_to_offset_is_invertible() {
        let g = geom();
        for c in [2u32, 3, 100, g.cluster_count() + 1] {
            let ofs = g.cluster_to_offset(c).unwrap();
            assert_eq!(g.offset_to_cluster(ofs).unwrap(), c);
        }
    }

    #[test]
    fn cluster_to_offset_rejects_out_of_range() {
        let g = geom();
        let too_far = g.cluster_count() + 2;
        assert!(g.cluster_to_offset(too_far).is_err());
    }
}
