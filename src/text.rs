//! Text encoding helpers for archive entry names.
//!
//! 7z stores names as NUL-terminated UTF-16LE, Joliet as space-padded
//! UTF-16BE, and zip entries without the UTF-8 flag use a legacy
//! single-byte codepage chosen by the caller.

use crate::{Error, Result};

/// Legacy codepage for zip file names without the UTF-8 flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Codepage {
    /// Windows-1252 (the documented default).
    #[default]
    Win1252,
    /// ISO-8859-1.
    Latin1,
}

/// Windows-1252 mappings for 0x80..=0x9F; 0 marks an undefined code.
const WIN1252_HIGH: [u16; 32] = [
    0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC,
    0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
];

/// Decodes legacy single-byte text to UTF-8.
pub fn decode_codepage(data: &[u8], cp: Codepage) -> String {
    data.iter()
        .map(|&b| match (cp, b) {
            (Codepage::Win1252, 0x80..=0x9f) => {
                match WIN1252_HIGH[usize::from(b - 0x80)] {
                    0 => char::REPLACEMENT_CHARACTER,
                    u => char::from_u32(u32::from(u)).unwrap_or(char::REPLACEMENT_CHARACTER),
                }
            }
            _ => char::from(b),
        })
        .collect()
}

/// Decodes UTF-16 bytes (little- or big-endian) to UTF-8.
fn decode_utf16(data: &[u8], big_endian: bool) -> Result<String> {
    if data.len() % 2 != 0 {
        return Err(Error::NameInvalid("odd UTF-16 byte length"));
    }
    let units = data.chunks_exact(2).map(|c| {
        if big_endian {
            u16::from_be_bytes([c[0], c[1]])
        } else {
            u16::from_le_bytes([c[0], c[1]])
        }
    });
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|_| Error::NameInvalid("unpaired UTF-16 surrogate"))
}

/// Decodes UTF-16LE bytes (7z names).
pub fn utf16le_to_utf8(data: &[u8]) -> Result<String> {
    decode_utf16(data, false)
}

/// Decodes UTF-16BE bytes (Joliet names).
pub fn utf16be_to_utf8(data: &[u8]) -> Result<String> {
    decode_utf16(data, true)
}

/// Encodes UTF-8 as UTF-16BE bytes (Joliet names), appending to `out`.
pub fn utf8_to_utf16be(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
}

/// Byte length of `s` once encoded as UTF-16.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win1252_high_range() {
        assert_eq!(decode_codepage(&[0x80], Codepage::Win1252), "\u{20AC}");
        assert_eq!(decode_codepage(&[0x93, 0x94], Codepage::Win1252), "\u{201C}\u{201D}");
        assert_eq!(decode_codepage(b"abc", Codepage::Win1252), "abc");
        assert_eq!(decode_codepage(&[0xe9], Codepage::Win1252), "é");
    }

    #[test]
    fn latin1_is_transparent() {
        assert_eq!(decode_codepage(&[0x80], Codepage::Latin1), "\u{80}");
    }

    #[test]
    fn utf16_roundtrip() {
        let s = "naïve-файл.txt";
        let mut be = Vec::new();
        utf8_to_utf16be(s, &mut be);
        assert_eq!(be.len(), utf16_len(s));
        assert_eq!(utf16be_to_utf8(&be).unwrap(), s);
    }

    #[test]
    fn utf16le_decode() {
        let bytes = [b'h', 0, b'i', 0];
        assert_eq!(utf16le_to_utf8(&bytes).unwrap(), "hi");
        assert!(utf16le_to_utf8(&[0x00]).is_err());
        assert!(utf16le_to_utf8(&[0x00, 0xd8]).is_err());
    }
}
