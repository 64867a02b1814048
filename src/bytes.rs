// Functions related to little-endian field decoding.
//
// dBase-family files are little-endian throughout, unlike the big-endian
// Mach-O convention InnoDB inherited from its on-disk format.
use byteorder::{ByteOrder, LittleEndian};

type E = LittleEndian;

pub fn read_u16(buf: &[u8]) -> u16 {
    E::read_u16(buf)
}

pub fn read_u32(buf: &[u8]) -> u32 {
    E::read_u32(buf)
}

pub fn read_i32(buf: &[u8]) -> i32 {
    E::read_i32(buf)
}

pub fn write_u16(buf: &mut [u8], v: u16) {
    E::write_u16(buf, v)
}

pub fn write_u32(buf: &mut [u8], v: u32) {
    E::write_u32(buf, v)
}

pub fn write_i32(buf: &mut [u8], v: i32) {
    E::write_i32(buf, v)
}

/// Trim trailing ASCII spaces from a fixed-width character slot.
pub fn trim_trailing_spaces(s: &str) -> &str {
    s.trim_end_matches(' ')
}

/// Right-pad `s` with ASCII spaces to `width` bytes, truncating if longer.
pub fn pad_right(s: &str, width: usize) -> Vec<u8> {
    let mut out = vec![b' '; width];
    let bytes = s.as_bytes();
    let n = bytes.len().min(width);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_write_u32_roundtrip() {
        let mut buf = [0u8; 4];
        write_u32(&mut buf, 0x1020_3040);
        assert_eq!(read_u32(&buf), 0x1020_3040);
    }

    #[test]
    fn test_pad_right_truncates() {
        let out = pad_right("hello world", 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn test_pad_right_pads() {
        let out = pad_right("hi", 5);
        assert_eq!(&out, b"hi   ");
    }

    #[test]
    fn test_trim_trailing_spaces() {
        assert_eq!(trim_trailing_spaces("hi   "), "hi");
        assert_eq!(trim_trailing_spaces("  hi  "), "  hi");
    }
}
