//! On-disk structures of the `.gz` format.
//!
//! A member is `HEADER [extra] [name] [comment] [header-crc] DATA TRAILER`;
//! a file may hold several members back to back.

use crate::{Error, Result};

/// Fixed gz header length before the optional fields.
pub(crate) const HEADER_LEN: usize = 10;
/// Trailer: LE32 CRC of uncompressed data, LE32 size modulo 2^32.
pub(crate) const TRAILER_LEN: usize = 8;

pub(crate) const FLAG_HDR_CRC: u8 = 0x02;
pub(crate) const FLAG_EXTRA: u8 = 0x04;
pub(crate) const FLAG_NAME: u8 = 0x08;
pub(crate) const FLAG_COMMENT: u8 = 0x10;
pub(crate) const FLAG_ALL: u8 = 0x1e;

const METHOD_DEFLATE: u8 = 8;

/// Info parsed from a member's header and trailer.
#[derive(Debug, Clone, Default)]
pub struct GzInfo {
    /// The `extra` field, when present.
    pub extra: Vec<u8>,
    /// The original file name, when present.
    pub name: Vec<u8>,
    /// The comment, when present.
    pub comment: Vec<u8>,
    /// Modification time, seconds since 1970.
    pub mtime: u32,
    /// CRC-32 of the uncompressed data (from the trailer).
    pub uncompressed_crc: u32,
    /// Uncompressed size. Recovered from the trailer's 32-bit field, so
    /// not accurate for members over 4 GiB.
    pub uncompressed_size: u64,
    /// Compressed bytes consumed so far.
    pub compressed_size: u64,
}

/// Parses the fixed header. Returns the flag byte.
pub(crate) fn header_read(buf: &[u8], mtime: &mut u32) -> Result<u8> {
    if buf[0] != 0x1f || buf[1] != 0x8b {
        return Err(Error::BadMagic { format: "gz" });
    }
    if buf[2] != METHOD_DEFLATE {
        return Err(Error::UnsupportedCodec {
            what: "gz compression method other than deflate",
        });
    }
    *mtime = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok(buf[3])
}

/// Serializes a header with optional name/comment fields.
pub(crate) fn header_write(name: &[u8], comment: &[u8], mtime: u32, out: &mut Vec<u8>) {
    let mut flags = 0u8;
    if !name.is_empty() {
        flags |= FLAG_NAME;
    }
    if !comment.is_empty() {
        flags |= FLAG_COMMENT;
    }

    out.extend_from_slice(&[0x1f, 0x8b, METHOD_DEFLATE, flags]);
    out.extend_from_slice(&mtime.to_le_bytes());
    out.push(0); // xflags
    out.push(255); // OS: unknown

    if !name.is_empty() {
        out.extend_from_slice(name);
        out.push(0);
    }
    if !comment.is_empty() {
        out.extend_from_slice(comment);
        out.push(0);
    }
}

/// Parses the trailer. Returns `(crc, size32)`.
pub(crate) fn trailer_read(buf: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
    )
}

/// Serializes the trailer.
pub(crate) fn trailer_write(crc: u32, orig_size: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&orig_size.to_le_bytes());
}
