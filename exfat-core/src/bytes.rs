//! Unaligned field access over raw byte slices.
//!
//! The exFAT on-disk layout is bit-packed and the device is frequently mapped
//! read-only, so structures are never reinterpreted via pointer casts. Every
//! packed field is read and written by explicit offset through `byteorder`,
//! which keeps the exact on-disk byte layout without depending on
//! `#[repr(C, packed)]` + unsafe reference casts (undefined behavior if the
//! resulting reference is ever misaligned or read through normal field
//! access).

use byteorder::{ByteOrder, LittleEndian};

/// Reads a little-endian `u8` field.
pub fn read_u8(buf: &[u8], offset: usize) -> u8 {
    buf[offset]
}

/// Reads a little-endian `u16` field.
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&buf[offset..offset + 2])
}

/// Reads a little-endian `u32` field.
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&buf[offset..offset + 4])
}

/// Reads a little-endian `u64` field.
pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&buf[offset..offset + 8])
}

/// Reads `count` little-endian `u16` code units starting at `offset`.
pub fn read_u16_array(buf: &[u8], offset: usize, count: usize, out: &mut [u16]) {
    for i in 0..count {
        out[i] = read_u16(buf, offset + i * 2);
    }
}

/// Writes a little-endian `u8` field.
pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) {
    buf[offset] = value;
}

/// Writes a little-endian `u16` field.
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

/// Writes a little-endian `u32` field.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

/// Writes a little-endian `u64` field.
pub fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    LittleEndian::write_u64(&mut buf[offset..offset + 8], value);
}

/// Writes `values` as little-endian `u16` code units starting at `offset`.
pub fn write_u16_array(buf: &mut [u8], offset: usize, values: &[u16]) {
    for (i, v) in values.iter().enumerate() {
        write_u16(buf, offset + i * 2, *v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_widths() {
        let mut buf = [0u8; 32];
        write_u8(&mut buf, 0, 0x85);
        write_u16(&mut buf, 1, 0x1234);
        write_u32(&mut buf, 4, 0xdead_beef);
        write_u64(&mut buf, 8, 0x0123_4567_89ab_cdef);
        assert_eq!(read_u8(&buf, 0), 0x85);
        assert_eq!(read_u16(&buf, 1), 0x1234);
        assert_eq!(read_u32(&buf, 4), 0xdead_beef);
        assert_eq!(read_u64(&buf, 8), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn u16_array_round_trips() {
        let mut buf = [0u8; 32];
        let values = [0x41u16, 0x42, 0x43, 0];
        write_u16_array(&mut buf, 2, &values);
        let mut out = [0u16; 4];
        read_u16_array(&buf, 2, 4, &mut out);
        assert_eq!(out, values);
    }
}
