//! UTF-16 filename decoding across file-name continuation entries.

use crate::entry::FileNameEntry;

/// Code units considered invalid in a filename: the fixed blacklist
/// `" * / : < > ? \ |` plus controls below 0x20.
pub fn is_blacklisted(unit: u16) -> bool {
    if unit < 0x20 {
        return true;
    }
    matches!(unit, 0x0022 | 0x002A | 0x002F | 0x003A | 0x003C | 0x003E | 0x003F | 0x005C | 0x007C)
}

/// The outcome of decoding a filename from its continuation entries.
pub struct DecodedName {
    pub name: String,
    /// True if fewer code units were found than `name_length` declared, or a
    /// blacklisted code unit was present.
    pub suspect: bool,
}

/// Concatenates up to 15 UTF-16 code units from each of `name_entries` until
/// `name_length` units have been consumed, then decodes to UTF-8. Stops early
/// if the entries run out before `name_length` is reached; the caller is
/// expected to treat that as a warning, not a hard failure (spec boundary
/// scenario B4).
pub fn decode_name(name_entries: &[FileNameEntry], name_length: usize) -> DecodedName {
    let mut units: Vec<u16> = Vec::with_capacity(name_length);
    let mut suspect = false;
    'outer: for entry in name_entries {
        for &unit in entry.name.iter() {
            if units.len() == name_length {
                break 'outer;
            }
            if is_blacklisted(unit) {
                suspect = true;
            }
            units.push(unit);
        }
    }
    if units.len() < name_length {
        suspect = true;
    }
    // `name_length` may overrun into an entry's zero-padded tail (declared
    // longer than the real name); trailing NULs from that overrun aren't
    // part of the name.
    let name = String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string();
    DecodedName { name, suspect }
}

/// Encodes a UTF-8 name back into as many [`FileNameEntry`] records as needed
/// (15 code units per entry), used when synthesizing directory entries during
/// metadata writeback.
pub fn encode_name(name: &str) -> Vec<FileNameEntry> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut entries = Vec::new();
    for chunk in units.chunks(15) {
        let mut name_buf = [0u16; 15];
        name_buf[..chunk.len()].copy_from_slice(chunk);
        entries.push(FileNameEntry { name: name_buf });
    }
    if entries.is_empty() {
        entries.push(FileNameEntry { name: [0u16; 15] });
    }
    entries
}

/// Replaces blacklisted code units with `_` for use as a host filesystem path
/// component (host filesystems forbid some of the same characters exFAT
/// tolerates in a name).
pub fn sanitize_for_host_fs(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c as u32) <= u16::MAX as u32 && is_blacklisted(c as u16) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_entries_from_str(s: &str) -> Vec<FileNameEntry> {
        encode_name(s)
    }

    #[test]
    fn decodes_exact_length_name() {
        let entries = name_entries_from_str("A");
        let decoded = decode_name(&entries, 1);
        assert_eq!(decoded.name, "A");
        assert!(!decoded.suspect);
    }

    #[test]
    fn decodes_long_name_across_entries() {
        let long_name: String = "x".repeat(255);
        let entries = name_entries_from_str(&long_name);
        assert_eq!(entries.len(), 17);
        let decoded = decode_name(&entries, 255);
        assert_eq!(decoded.name, long_name);
        assert!(!decoded.suspect);
    }

    #[test]
    fn truncated_name_is_marked_suspect() {
        let entries = name_entries_from_str("short");
        let decoded = decode_name(&entries, 10);
        assert_eq!(decoded.name, "short");
        assert!(decoded.suspect);
    }

    #[test]
    fn blacklisted_unit_marks_suspect() {
        let entries = name_entries_from_str("a*b");
        let decoded = decode_name(&entries, 3);
        assert!(decoded.suspect);
    }

    #[test]
    fn sanitize_replaces_blacklisted_chars() {
        assert_eq!(sanitize_for_host_fs("a*b:c"), "a_b_c");
    }
}
