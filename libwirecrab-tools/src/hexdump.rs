use nom::HexDisplay;

/// Number of bytes shown on each line of a hex dump
pub const HEXDUMP_CHUNK_SIZE: usize = 16;

/// Render `data` as a hex dump: one line per 16 bytes, with offset, hex bytes and
/// printable ASCII characters.
///
/// Returns an empty string for empty input.
pub fn hex_dump(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    data.to_hex(HEXDUMP_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::hex_dump;

    #[test]
    fn hexdump_lines() {
        assert_eq!(hex_dump(&[]), "");
        let data: Vec<u8> = (0..20).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000"));
        assert!(lines[0].contains("00 01 02 03"));
        assert!(lines[1].starts_with("00000010"));
        assert!(lines[1].contains("10 11 12 13"));
    }

    #[test]
    fn hexdump_ascii() {
        let dump = hex_dump(b"GET / HTTP/1.1\r\n");
        assert!(dump.contains("GET / HTTP/1.1"));
    }
}
