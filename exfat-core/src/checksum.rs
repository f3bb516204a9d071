//! exFAT checksum algorithms: the 16-bit directory-entry-set checksum, the
//! 32-bit VBR (boot region) checksum, the 32-bit upcase table checksum, and a
//! standalone CRC-32 used only for post-hoc identity checks on extracted
//! file data (never part of the on-disk format).

/// Computes the 16-bit set checksum over a full entry-set triple
/// (`32 * (continuations + 1)` bytes), skipping bytes 2 and 3 of the primary
/// entry (the checksum field itself).
///
/// Recurrence: `c = rotate_right16(c, 1) + byte`.
pub fn set_checksum(entries: &[u8]) -> u16 {
    let mut c: u16 = 0;
    for (i, &byte) in entries.iter().enumerate() {
        if i == 2 || i == 3 {
            continue;
        }
        c = c.rotate_right(1).wrapping_add(byte as u16);
    }
    c
}

/// Computes the 32-bit VBR checksum over the first 11 sectors of the boot
/// region, skipping byte offsets 106, 107, and 112 (`volume_flags` and
/// `percent_used`).
///
/// Recurrence: `c = rotate_right32(c, 1) + byte`.
pub fn vbr_checksum(boot_region_first_11_sectors: &[u8]) -> u32 {
    let mut c: u32 = 0;
    for (i, &byte) in boot_region_first_11_sectors.iter().enumerate() {
        if i == 106 || i == 107 || i == 112 {
            continue;
        }
        c = c.rotate_right(1).wrapping_add(byte as u32);
    }
    c
}

/// Computes the 32-bit upcase table checksum. Same recurrence as
/// [`vbr_checksum`], applied to the whole table with no skipped bytes.
pub fn upcase_checksum(table_bytes: &[u8]) -> u32 {
    let mut c: u32 = 0;
    for &byte in table_bytes {
        c = c.rotate_right(1).wrapping_add(byte as u32);
    }
    c
}

const CRC32_POLY: u32 = 0xEDB8_8320;

fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                CRC32_POLY ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Reflected CRC-32 (polynomial 0xEDB88320), initial value 0xFFFFFFFF, final
/// inversion. Used only for identity checks on extracted file data; it is not
/// part of the on-disk exFAT format.
pub struct Crc32 {
    table: [u32; 256],
}

impl Crc32 {
    pub fn new() -> Self {
        Self {
            table: build_crc32_table(),
        }
    }

    pub fn digest(&self, data: &[u8]) -> u32 {
        let mut c = 0xFFFF_FFFFu32;
        for &byte in data {
            let idx = ((c ^ byte as u32) & 0xFF) as usize;
            c = self.table[idx] ^ (c >> 8);
        }
        c ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
