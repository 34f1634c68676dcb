//! On-disk structures of the `.zip` format.
//!
//! `(FILE_HDR data [DATA_DESCRIPTOR])... (CDIR_ENTRY)...
//! [EOCD64 EOCD64_LOCATOR] EOCD`

use crate::timestamp::{Timestamp, dos_from_unix, unix_from_dos};
use crate::{Error, Result};

pub(crate) const SIG_LOCAL: &[u8; 4] = b"PK\x03\x04";
pub(crate) const SIG_CDIR: &[u8; 4] = b"PK\x01\x02";
pub(crate) const SIG_EOCD: &[u8; 4] = b"PK\x05\x06";
pub(crate) const SIG_EOCD64: &[u8; 4] = b"PK\x06\x06";
pub(crate) const SIG_EOCD64_LOC: &[u8; 4] = b"PK\x06\x07";
pub(crate) const SIG_DATA_DESC: &[u8; 4] = b"PK\x07\x08";

pub(crate) const LOCAL_FIXED: usize = 30;
pub(crate) const CDIR_FIXED: usize = 46;
pub(crate) const EOCD_LEN: usize = 22;
pub(crate) const EOCD64_LEN: usize = 56;
pub(crate) const EOCD64_LOC_LEN: usize = 20;

/// Data descriptor lengths including the signature.
pub(crate) const DESC_LEN: usize = 4 + 12;
pub(crate) const DESC64_LEN: usize = 4 + 20;

/// The farthest from the end the EOCD can start (max comment length).
pub(crate) const EOCD_SEARCH: u64 = (EOCD_LEN + 0xffff) as u64;

const MIN_VERSION: u8 = 20;
const SYS_UNIX: u8 = 3;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESC: u16 = 0x0008;
const FLAG_UTF8: u16 = 1 << 11;

/// Entry compression method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipMethod {
    /// No compression.
    #[default]
    Stored,
    /// Raw deflate.
    Deflated,
    /// Zstandard (method 93).
    Zstandard,
    /// Anything else.
    Unknown(u16),
}

impl ZipMethod {
    pub(crate) fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Stored,
            8 => Self::Deflated,
            93 => Self::Zstandard,
            other => Self::Unknown(other),
        }
    }

    pub(crate) fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
            Self::Zstandard => 93,
            Self::Unknown(code) => code,
        }
    }
}

/// One archive entry, as described by a CDIR entry or local header.
#[derive(Debug, Clone, Default)]
pub struct ZipEntry {
    /// Entry name (normalized).
    pub name: String,
    /// Modification time.
    pub mtime: Timestamp,
    /// Windows attribute bits (low byte of the CDIR external attributes).
    pub attr_win: u32,
    /// Unix mode bits (high 16 bits of the CDIR external attributes).
    pub attr_unix: u32,
    /// Owner user id (`ux` extra).
    pub uid: u32,
    /// Owner group id (`ux` extra).
    pub gid: u32,
    /// Compression method.
    pub method: ZipMethod,
    /// CRC-32 of the uncompressed data.
    pub crc: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
    /// Local header offset (from the CDIR).
    pub hdr_offset: u64,
    /// The name is flagged as UTF-8.
    pub utf8: bool,
    /// The entry is followed by a data descriptor.
    pub has_descriptor: bool,
}

impl ZipEntry {
    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        self.attr_unix & 0o170000 == 0o040000 || self.attr_win & 0x10 != 0
    }
}

fn le16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn le32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn le64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

/// Iterates extra-field records: returns `(id, payload, rest)`.
pub(crate) fn extra_next(data: &[u8]) -> Option<(u16, &[u8], &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let id = le16(data);
    let size = usize::from(le16(&data[2..]));
    if 4 + size > data.len() {
        return None;
    }
    Some((id, &data[4..4 + size], &data[4 + size..]))
}

/// Applies the zip64 extra to sizes flagged with 32-bit sentinels.
///
/// `sentinels` reports which fields were `0xffffffff` in the carrying
/// record: `(uncompressed, compressed, offset)`.
pub(crate) fn extra_zip64_read(
    mut data: &[u8],
    sentinels: (bool, bool, bool),
    info: &mut ZipEntry,
) -> Result<()> {
    if sentinels.0 {
        if data.len() < 8 {
            return Err(Error::Truncated);
        }
        info.uncompressed_size = le64(data);
        data = &data[8..];
    }
    if sentinels.1 {
        if data.len() < 8 {
            return Err(Error::Truncated);
        }
        info.compressed_size = le64(data);
        data = &data[8..];
    }
    if sentinels.2 {
        if data.len() < 8 {
            return Err(Error::Truncated);
        }
        info.hdr_offset = le64(data);
    }
    Ok(())
}

/// Reads the NTFS-times extra (id `0x000A`).
pub(crate) fn extra_ntfs_read(data: &[u8], info: &mut ZipEntry) -> Result<()> {
    if data.len() < 4 + 4 + 24 {
        return Err(Error::Truncated);
    }
    let tag = le16(&data[4..]);
    let tag_size = usize::from(le16(&data[6..]));
    if tag != 1 || tag_size < 24 {
        return Err(Error::BadStructure("zip NTFS extra tag"));
    }
    info.mtime = Timestamp::from_filetime(le64(&data[8..]));
    Ok(())
}

/// Reads the Unix-timestamps extra (id `0x5455`, "UT").
pub(crate) fn extra_unixtime_read(data: &[u8], info: &mut ZipEntry) -> Result<()> {
    let Some((&flags, rest)) = data.split_first() else {
        return Err(Error::Truncated);
    };
    if flags & 0x01 != 0 {
        if rest.len() < 4 {
            return Err(Error::Truncated);
        }
        info.mtime = Timestamp::from_unix(i64::from(le32(rest) as i32));
    }
    Ok(())
}

/// Reads the new-Unix uid/gid extra (id `0x7875`, "ux").
pub(crate) fn extra_newunix_read(data: &[u8], info: &mut ZipEntry) -> Result<()> {
    if data.len() < 2 || data[0] != 1 {
        return Err(Error::BadStructure("zip ux extra version"));
    }
    let mut d = &data[1..];

    let uid_size = usize::from(d[0]);
    if d.len() < 1 + uid_size {
        return Err(Error::Truncated);
    }
    if uid_size == 4 {
        info.uid = le32(&d[1..]);
    }
    d = &d[1 + uid_size..];

    let Some((&gid_size, rest)) = d.split_first() else {
        return Err(Error::Truncated);
    };
    let gid_size = usize::from(gid_size);
    if rest.len() < gid_size {
        return Err(Error::Truncated);
    }
    if gid_size == 4 {
        info.gid = le32(rest);
    }
    Ok(())
}

/// zip64 extra in a local header: `usize`, `csize` slots.
fn extra_fhdr64_write(out: &mut Vec<u8>, uncompressed: u64, compressed: u64) {
    out.extend_from_slice(&[0x01, 0x00, 16, 0]);
    out.extend_from_slice(&uncompressed.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
}

/// zip64 extra in a CDIR entry: `usize`, `csize`, `offset` slots.
fn extra_cdir64_write(out: &mut Vec<u8>, info: &ZipEntry) {
    out.extend_from_slice(&[0x01, 0x00, 24, 0]);
    out.extend_from_slice(&info.uncompressed_size.to_le_bytes());
    out.extend_from_slice(&info.compressed_size.to_le_bytes());
    out.extend_from_slice(&info.hdr_offset.to_le_bytes());
}

fn extra_unixtime_write(out: &mut Vec<u8>, info: &ZipEntry) {
    out.extend_from_slice(b"UT");
    out.extend_from_slice(&5u16.to_le_bytes());
    out.push(0x01);
    out.extend_from_slice(&(info.mtime.secs as u32).to_le_bytes());
}

fn extra_newunix_write(out: &mut Vec<u8>, info: &ZipEntry) {
    out.extend_from_slice(b"ux");
    out.extend_from_slice(&11u16.to_le_bytes());
    out.push(1); // version
    out.push(4); // uid size
    out.extend_from_slice(&info.uid.to_le_bytes());
    out.push(4); // gid size
    out.extend_from_slice(&info.gid.to_le_bytes());
}

fn dos_time(info: &ZipEntry, timezone_offset: i32) -> (u16, u16) {
    dos_from_unix(info.mtime.secs + i64::from(timezone_offset))
}

/// Serializes a local file header with zip64/UT/ux extras. The CRC and
/// size slots are patched later via [`local_header_update`].
pub(crate) fn local_header_write(
    out: &mut Vec<u8>,
    info: &ZipEntry,
    timezone_offset: i32,
) -> Result<()> {
    if info.name.len() > 0xffff {
        return Err(Error::NameInvalid("zip name over 65535 bytes"));
    }

    out.extend_from_slice(SIG_LOCAL);
    out.extend_from_slice(&[MIN_VERSION, 0]);
    let flags = if info.has_descriptor { FLAG_DATA_DESC } else { 0 };
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&info.method.code().to_le_bytes());

    let (date, time) = dos_time(info, timezone_offset);
    out.extend_from_slice(&time.to_le_bytes());
    out.extend_from_slice(&date.to_le_bytes());

    out.extend_from_slice(&info.crc.to_le_bytes());
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());

    out.extend_from_slice(&(info.name.len() as u16).to_le_bytes());
    let extra_len = 4 + 16 + 4 + 5 + 4 + 11;
    out.extend_from_slice(&(extra_len as u16).to_le_bytes());

    out.extend_from_slice(info.name.as_bytes());
    extra_fhdr64_write(out, info.uncompressed_size, info.compressed_size);
    extra_unixtime_write(out, info);
    extra_newunix_write(out, info);
    Ok(())
}

/// Patches the CRC and zip64 size slots of a serialized local header.
pub(crate) fn local_header_update(
    buf: &mut [u8],
    uncompressed: u64,
    compressed: u64,
    crc: u32,
) {
    buf[14..18].copy_from_slice(&crc.to_le_bytes());
    let name_len = usize::from(le16(&buf[26..]));
    let extra = LOCAL_FIXED + name_len;
    buf[extra + 4..extra + 12].copy_from_slice(&uncompressed.to_le_bytes());
    buf[extra + 12..extra + 20].copy_from_slice(&compressed.to_le_bytes());
}

/// Parses the fixed part of a local file header.
///
/// Returns the total record length (with name and extras).
pub(crate) fn local_header_read(
    buf: &[u8],
    info: &mut ZipEntry,
    timezone_offset: i32,
) -> Result<usize> {
    if &buf[..4] != SIG_LOCAL {
        return Err(Error::BadMagic { format: "zip" });
    }
    let flags = le16(&buf[6..]);
    if flags & FLAG_ENCRYPTED != 0 {
        return Err(Error::UnsupportedCodec {
            what: "encrypted zip entry",
        });
    }
    info.has_descriptor = flags & FLAG_DATA_DESC != 0;
    info.utf8 = flags & FLAG_UTF8 != 0;
    info.method = ZipMethod::from_code(le16(&buf[8..]));
    info.mtime =
        Timestamp::from_unix(unix_from_dos(le16(&buf[12..]), le16(&buf[10..])) - i64::from(timezone_offset));
    info.crc = le32(&buf[14..]);
    info.compressed_size = u64::from(le32(&buf[18..]));
    info.uncompressed_size = u64::from(le32(&buf[22..]));
    Ok(LOCAL_FIXED + usize::from(le16(&buf[26..])) + usize::from(le16(&buf[28..])))
}

/// Serializes a CDIR entry with zip64/UT/ux extras. Size slots are
/// patched later via [`cdir_entry_finish`].
pub(crate) fn cdir_entry_write(
    out: &mut Vec<u8>,
    info: &ZipEntry,
    timezone_offset: i32,
) -> Result<usize> {
    if info.name.len() > 0xffff {
        return Err(Error::NameInvalid("zip name over 65535 bytes"));
    }
    let start = out.len();

    out.extend_from_slice(SIG_CDIR);
    out.extend_from_slice(&[MIN_VERSION, SYS_UNIX, MIN_VERSION, 0]);
    out.extend_from_slice(&FLAG_DATA_DESC.to_le_bytes());
    out.extend_from_slice(&info.method.code().to_le_bytes());

    let (date, time) = dos_time(info, timezone_offset);
    out.extend_from_slice(&time.to_le_bytes());
    out.extend_from_slice(&date.to_le_bytes());

    out.extend_from_slice(&info.crc.to_le_bytes());
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());

    out.extend_from_slice(&(info.name.len() as u16).to_le_bytes());
    let extra_len: u16 = 4 + 24 + 4 + 5 + 4 + 11;
    out.extend_from_slice(&extra_len.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes

    out.push(info.attr_win as u8);
    out.push(0);
    out.extend_from_slice(&(info.attr_unix as u16).to_le_bytes());
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // offset

    out.extend_from_slice(info.name.as_bytes());
    extra_cdir64_write(out, info);
    extra_unixtime_write(out, info);
    extra_newunix_write(out, info);
    Ok(out.len() - start)
}

/// Patches the CRC and zip64 size slots of a serialized CDIR entry.
pub(crate) fn cdir_entry_finish(buf: &mut [u8], uncompressed: u64, compressed: u64, crc: u32) {
    buf[16..20].copy_from_slice(&crc.to_le_bytes());
    let name_len = usize::from(le16(&buf[28..]));
    let extra = CDIR_FIXED + name_len;
    buf[extra + 4..extra + 12].copy_from_slice(&uncompressed.to_le_bytes());
    buf[extra + 12..extra + 20].copy_from_slice(&compressed.to_le_bytes());
}

/// Parses the fixed part of a CDIR entry.
///
/// Returns the total record length (with name, extras and comment).
pub(crate) fn cdir_entry_read(
    buf: &[u8],
    info: &mut ZipEntry,
    timezone_offset: i32,
) -> Result<usize> {
    if &buf[..4] != SIG_CDIR {
        return Err(Error::BadStructure("bad zip CDIR entry signature"));
    }
    let flags = le16(&buf[8..]);
    info.utf8 = flags & FLAG_UTF8 != 0;
    info.method = ZipMethod::from_code(le16(&buf[10..]));
    info.mtime =
        Timestamp::from_unix(unix_from_dos(le16(&buf[14..]), le16(&buf[12..])) - i64::from(timezone_offset));
    info.crc = le32(&buf[16..]);
    info.compressed_size = u64::from(le32(&buf[20..]));
    info.uncompressed_size = u64::from(le32(&buf[24..]));
    info.attr_win = u32::from(buf[38]);
    info.attr_unix = u32::from(le16(&buf[40..]));
    info.hdr_offset = u64::from(le32(&buf[42..]));
    Ok(CDIR_FIXED
        + usize::from(le16(&buf[28..]))
        + usize::from(le16(&buf[30..]))
        + usize::from(le16(&buf[32..])))
}

/// Which 32-bit fields of a CDIR entry carry the zip64 sentinel.
pub(crate) fn cdir_sentinels(buf: &[u8]) -> (bool, bool, bool) {
    (
        le32(&buf[24..]) == 0xffff_ffff,
        le32(&buf[20..]) == 0xffff_ffff,
        le32(&buf[42..]) == 0xffff_ffff,
    )
}

/// Which 32-bit fields of a local header carry the zip64 sentinel.
pub(crate) fn local_sentinels(buf: &[u8]) -> (bool, bool, bool) {
    (
        le32(&buf[22..]) == 0xffff_ffff,
        le32(&buf[18..]) == 0xffff_ffff,
        false,
    )
}

/// Serializes the zip64 data descriptor.
pub(crate) fn descriptor64_write(out: &mut Vec<u8>, uncompressed: u64, compressed: u64, crc: u32) {
    out.extend_from_slice(SIG_DATA_DESC);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
}

/// Parses a data descriptor (with or without signature); `zip64` selects
/// the 8-byte size form.
pub(crate) fn descriptor_read(buf: &[u8], zip64: bool, info: &mut ZipEntry) {
    let d = if &buf[..4] == SIG_DATA_DESC {
        &buf[4..]
    } else {
        buf
    };
    info.crc = le32(d);
    if zip64 {
        info.compressed_size = le64(&d[4..]);
        info.uncompressed_size = le64(&d[12..]);
    } else {
        info.compressed_size = u64::from(le32(&d[4..]));
        info.uncompressed_size = u64::from(le32(&d[8..]));
    }
}

/// Finds the last EOCD signature in `buf`.
pub(crate) fn eocd_find(buf: &[u8]) -> Option<usize> {
    buf.windows(4).rposition(|w| w == SIG_EOCD)
}

/// Parsed EOCD fields.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Eocd {
    pub disk: u32,
    pub cdir_disk: u32,
    pub entries: u64,
    pub cdir_size: u64,
    pub cdir_offset: u64,
}

pub(crate) fn eocd_read(buf: &[u8]) -> Result<Eocd> {
    if buf.len() < EOCD_LEN || &buf[..4] != SIG_EOCD {
        return Err(Error::BadStructure("bad zip EOCD"));
    }
    let comment = usize::from(le16(&buf[20..]));
    if buf.len() < EOCD_LEN + comment {
        return Err(Error::Truncated);
    }
    Ok(Eocd {
        disk: u32::from(le16(&buf[4..])),
        cdir_disk: u32::from(le16(&buf[6..])),
        entries: u64::from(le16(&buf[10..])),
        cdir_size: u64::from(le32(&buf[12..])),
        cdir_offset: u64::from(le32(&buf[16..])),
    })
}

pub(crate) fn eocd_write(out: &mut Vec<u8>, cdir_size: u32, cdir_offset: u32, entries: u16) {
    out.extend_from_slice(SIG_EOCD);
    out.extend_from_slice(&[0; 4]); // disk numbers
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&cdir_size.to_le_bytes());
    out.extend_from_slice(&cdir_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
}

pub(crate) fn eocd64_read(buf: &[u8]) -> Result<Eocd> {
    if &buf[..4] != SIG_EOCD64 {
        return Err(Error::BadStructure("bad zip64 EOCD"));
    }
    if le64(&buf[4..]) < (EOCD64_LEN - 12) as u64 {
        return Err(Error::BadStructure("zip64 EOCD too short"));
    }
    let cdir_size = le64(&buf[40..]);
    let cdir_offset = le64(&buf[48..]);
    if cdir_offset.checked_add(cdir_size).is_none() {
        return Err(Error::BadStructure("zip64 EOCD range overflow"));
    }
    Ok(Eocd {
        disk: le32(&buf[16..]),
        cdir_disk: le32(&buf[20..]),
        entries: le64(&buf[32..]),
        cdir_size,
        cdir_offset,
    })
}

pub(crate) fn eocd64_write(out: &mut Vec<u8>, cdir_size: u64, cdir_offset: u64, entries: u64) {
    out.extend_from_slice(SIG_EOCD64);
    out.extend_from_slice(&((EOCD64_LEN - 12) as u64).to_le_bytes());
    out.extend_from_slice(&[0; 4]); // version made by / needed
    out.extend_from_slice(&[0; 8]); // disk numbers
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&entries.to_le_bytes());
    out.extend_from_slice(&cdir_size.to_le_bytes());
    out.extend_from_slice(&cdir_offset.to_le_bytes());
}

/// Parsed zip64 EOCD locator fields: `(eocd64_offset, disks)`.
pub(crate) fn eocd64_loc_read(buf: &[u8]) -> Result<(u64, u32, u32)> {
    if &buf[..4] != SIG_EOCD64_LOC {
        return Err(Error::BadStructure("bad zip64 EOCD locator"));
    }
    Ok((le64(&buf[8..]), le32(&buf[4..]), le32(&buf[16..])))
}

pub(crate) fn eocd64_loc_write(out: &mut Vec<u8>, eocd64_offset: u64) {
    out.extend_from_slice(SIG_EOCD64_LOC);
    out.extend_from_slice(&0u32.to_le_bytes()); // EOCD64 disk
    out.extend_from_slice(&eocd64_offset.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // total disks
}
