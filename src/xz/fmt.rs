//! On-disk structures of the `.xz` format.
//!
//! `STREAM_HDR (BLK_HDR DATA [PADDING] [CHECK])... INDEX STREAM_FTR`

use crate::checksum::Crc32;
use crate::varint;
use crate::{Error, Result};

pub(crate) const STREAM_HEADER_LEN: usize = 12;
pub(crate) const STREAM_FOOTER_LEN: usize = 12;

pub(crate) const MAGIC: &[u8; 6] = b"\xFD7zXZ\x00";
pub(crate) const FOOTER_MAGIC: &[u8; 2] = b"YZ";

pub(crate) const FILTER_X86: u64 = 0x04;
pub(crate) const FILTER_LZMA2: u64 = 0x21;

/// Info recovered from the stream index.
#[derive(Debug, Clone, Copy, Default)]
pub struct XzInfo {
    /// Total uncompressed size of all blocks.
    pub uncompressed_size: u64,
    /// Compressed bytes consumed so far.
    pub compressed_size: u64,
}

/// The integrity check declared by the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckMethod {
    None,
    Crc32,
    Crc64,
    Sha256,
}

impl CheckMethod {
    pub fn from_flags(id: u8) -> Result<Self> {
        match id {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Crc32),
            0x04 => Ok(Self::Crc64),
            0x0a => Ok(Self::Sha256),
            _ => Err(Error::UnsupportedCodec {
                what: "xz check method",
            }),
        }
    }

    /// Stored length of the check field after each block.
    pub fn len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
            Self::Crc64 => 8,
            Self::Sha256 => 32,
        }
    }
}

/// One filter record from a block header.
#[derive(Debug, Clone)]
pub(crate) struct FilterRecord {
    pub id: u64,
    pub props: Vec<u8>,
}

/// Parses the stream header; returns the check method.
pub(crate) fn stream_header_read(buf: &[u8]) -> Result<CheckMethod> {
    if &buf[..6] != MAGIC {
        return Err(Error::BadMagic { format: "xz" });
    }
    let stored = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let actual = Crc32::compute(&buf[6..8]);
    if stored != actual {
        return Err(Error::BadHeaderCrc {
            offset: 0,
            expected: stored,
            actual,
        });
    }
    if buf[6] != 0 || buf[7] & 0xf0 != 0 {
        return Err(Error::BadStructure("xz stream header flags"));
    }
    CheckMethod::from_flags(buf[7] & 0x0f)
}

/// Parses the stream footer; returns the stored index size in bytes.
pub(crate) fn stream_footer_read(buf: &[u8], offset: u64) -> Result<u64> {
    let stored = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let actual = Crc32::compute(&buf[4..10]);
    if stored != actual {
        return Err(Error::BadHeaderCrc {
            offset,
            expected: stored,
            actual,
        });
    }
    if &buf[10..12] != FOOTER_MAGIC {
        return Err(Error::BadMagic { format: "xz" });
    }
    let stored_size = u64::from(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]));
    Ok((stored_size + 1) * 4)
}

/// Parses a complete block header (including its trailing CRC).
pub(crate) fn block_header_read(buf: &[u8], offset: u64) -> Result<Vec<FilterRecord>> {
    let flags = buf[1];
    if flags & 0x3c != 0 {
        return Err(Error::BadStructure("reserved xz block header flags"));
    }

    let mut d = &buf[2..buf.len() - 4];
    if flags & 0x40 != 0 {
        let (_size, n) = varint::xz_decode(d)?;
        d = &d[n..];
    }
    if flags & 0x80 != 0 {
        let (_osize, n) = varint::xz_decode(d)?;
        d = &d[n..];
    }

    let nfilt = usize::from(flags & 0x03) + 1;
    let mut filters = Vec::with_capacity(nfilt);
    for _ in 0..nfilt {
        let (id, n) = varint::xz_decode(d)?;
        d = &d[n..];
        let (prop_len, n) = varint::xz_decode(d)?;
        d = &d[n..];
        let prop_len = usize::try_from(prop_len).map_err(|_| Error::BadVarint)?;
        if d.len() < prop_len {
            return Err(Error::BadStructure("xz filter properties run past header"));
        }
        filters.push(FilterRecord {
            id,
            props: d[..prop_len].to_vec(),
        });
        d = &d[prop_len..];
    }

    if !d.iter().all(|&b| b == 0) {
        return Err(Error::BadStructure("nonzero xz block header padding"));
    }

    let stored = u32::from_le_bytes(
        buf[buf.len() - 4..].try_into().map_err(|_| Error::Truncated)?,
    );
    let actual = Crc32::compute(&buf[..buf.len() - 4]);
    if stored != actual {
        return Err(Error::BadHeaderCrc {
            offset,
            expected: stored,
            actual,
        });
    }

    log::debug!("xz block header: {} filter(s)", filters.len());
    Ok(filters)
}

/// Parses the index; returns the total uncompressed size of all blocks.
pub(crate) fn index_read(buf: &[u8], offset: u64) -> Result<u64> {
    if buf.len() < 8 || buf[0] != 0 {
        return Err(Error::BadStructure("xz index indicator"));
    }
    let mut d = &buf[1..buf.len() - 4];

    let (nrec, n) = varint::xz_decode(d)?;
    d = &d[n..];

    let mut total_osize = 0u64;
    for i in 0..nrec {
        let (size, n) = varint::xz_decode(d)?;
        d = &d[n..];
        let (osize, n) = varint::xz_decode(d)?;
        d = &d[n..];
        log::trace!("xz index: block #{i}: {osize} -> {size}");
        total_osize += osize;
    }

    if !d.iter().all(|&b| b == 0) {
        return Err(Error::BadStructure("nonzero xz index padding"));
    }

    let stored = u32::from_le_bytes(
        buf[buf.len() - 4..].try_into().map_err(|_| Error::Truncated)?,
    );
    let actual = Crc32::compute(&buf[..buf.len() - 4]);
    if stored != actual {
        return Err(Error::BadHeaderCrc {
            offset,
            expected: stored,
            actual,
        });
    }
    Ok(total_osize)
}
