//! On-disk structures of the ISO-9660 format.
//!
//! `16 empty sectors | volume descriptors | path tables | directories |
//! file extents`, all in 2048-byte sectors. Directory records carry
//! optional Rock-Ridge system-use entries; a Joliet supplementary volume
//! descriptor re-describes the tree with UTF-16BE names.

use crate::archive_path::split_name;
use crate::text;
use crate::timestamp::DateTime;
use crate::{Error, Result};

/// Logical sector size; the only block size accepted.
pub(crate) const SECTOR: usize = 2048;

/// Directory bit in [`IsoEntry::attr`].
pub(crate) const ATTR_DIR: u32 = 0o040000;

pub(crate) const VD_PRIMARY: u8 = 1;
pub(crate) const VD_JOLIET: u8 = 2;
pub(crate) const VD_TERMINATOR: u8 = 0xff;

/// Directory-record flag: entry is a directory.
const FLAG_DIR: u8 = 2;

/// Fixed part of a directory record, before the name.
pub(crate) const ENT_HEADER: usize = 33;

/// System identifier written into volume descriptors.
const SYSTEM_NAME: &str = "LINUX";
/// Joliet UCS-2 level 3 escape sequence.
const JOLIET_ESCAPE: &[u8; 3] = b"%/E";

/// Record length of a directory entry with an `n`-byte name (the record
/// is padded to even length).
pub(crate) fn ent_len(name_len: usize) -> usize {
    ENT_HEADER + name_len + usize::from(name_len % 2 == 0)
}

/// Entry-write behavior flags.
pub(crate) const ENT_RR: u32 = 1;
pub(crate) const ENT_JOLIET: u32 = 2;
pub(crate) const ENT_RR_SP: u32 = 8;

/// One enumerated entry.
#[derive(Debug, Clone, Default)]
pub struct IsoEntry {
    /// Entry path, `/`-separated.
    pub name: String,
    /// Modification time, seconds since 1970.
    pub mtime: i64,
    /// POSIX-style mode bits; `0o040000` marks a directory. Populated from
    /// Rock-Ridge `PX` when present.
    pub attr: u32,
    /// Owner user id (Rock-Ridge `PX`).
    pub uid: u32,
    /// Owner group id (Rock-Ridge `PX`).
    pub gid: u32,
    /// Absolute byte offset of the data on disk.
    pub offset: u64,
    /// Data size in bytes.
    pub size: u64,
}

impl IsoEntry {
    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIR != 0
    }
}

fn write32_both(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_le_bytes());
    buf[4..8].copy_from_slice(&val.to_be_bytes());
}

fn write16_both(buf: &mut [u8], val: u16) {
    buf[..2].copy_from_slice(&val.to_le_bytes());
    buf[2..4].copy_from_slice(&val.to_be_bytes());
}

fn date_write(buf: &mut [u8], mtime: i64) {
    let dt = DateTime::from_unix(mtime);
    buf[0] = (dt.year - 1900).clamp(0, 255) as u8;
    buf[1] = dt.month as u8;
    buf[2] = dt.day as u8;
    buf[3] = dt.hour as u8;
    buf[4] = dt.minute as u8;
    buf[5] = dt.second as u8;
    buf[6] = 0; // GMT offset in 15-minute units
}

fn date_read(buf: &[u8]) -> i64 {
    DateTime {
        year: 1900 + i32::from(buf[0]),
        month: u32::from(buf[1]),
        day: u32::from(buf[2]),
        hour: u32::from(buf[3]),
        minute: u32::from(buf[4]),
        second: u32::from(buf[5]),
    }
    .to_unix()
}

/// A directory record parsed from a sector.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedEntry {
    pub offset: u64,
    pub size: u64,
    pub mtime: i64,
    pub attr: u32,
    pub uid: u32,
    pub gid: u32,
    /// Raw name bytes; empty for the `\0`/`\1` self and parent entries.
    pub name: Vec<u8>,
}

/// Parses one directory record from the front of `buf`.
///
/// Returns `None` when the next byte is zero (no more records in this
/// sector), otherwise the record and its stored length.
pub(crate) fn ent_read(buf: &[u8]) -> Result<Option<(ParsedEntry, usize)>> {
    if buf.is_empty() || buf[0] == 0 {
        return Ok(None);
    }
    let len = usize::from(buf[0]);
    if buf.len() < ENT_HEADER || buf.len() < len {
        return Err(Error::Truncated);
    }
    let namelen = usize::from(buf[32]);
    if namelen == 0 || len < ent_len(namelen) {
        return Err(Error::BadStructure("directory record length"));
    }
    if buf[1] != 0 {
        return Err(Error::UnsupportedCodec {
            what: "iso extended attribute records",
        });
    }

    let body_off = u32::from_le_bytes(buf[2..6].try_into().map_err(|_| Error::Truncated)?);
    let body_len = u32::from_le_bytes(buf[10..14].try_into().map_err(|_| Error::Truncated)?);
    let flags = buf[25];

    let mut f = ParsedEntry {
        offset: u64::from(body_off) * SECTOR as u64,
        size: u64::from(body_len),
        mtime: date_read(&buf[18..25]),
        ..ParsedEntry::default()
    };

    let name = &buf[33..33 + namelen];
    if flags & FLAG_DIR != 0 {
        f.attr = ATTR_DIR;
        if !(namelen == 1 && (name[0] == 0 || name[0] == 1)) {
            f.name = name.to_vec();
        }
    } else {
        f.name = name.to_vec();
    }

    log::trace!(
        "iso dir record: body-off:{:#x} body-len:{:#x} flags:{:#x} len:{}",
        f.offset,
        f.size,
        flags,
        len
    );
    Ok(Some((f, len)))
}

/// Strips the `;1` version suffix (and a then-trailing dot) from an
/// ISO-level name.
pub(crate) fn strip_version(name: &[u8]) -> &[u8] {
    if let Some(pos) = name.iter().rposition(|&b| b == b';') {
        if &name[pos + 1..] == b"1" {
            let mut s = &name[..pos];
            if let [rest @ .., b'.'] = s {
                s = rest;
            }
            return s;
        }
    }
    name
}

/// Maps a name to the ISO-9660 character set: A-Z, 0-9, `_`.
fn copy_name(dst: &mut Vec<u8>, src: &str, limit: usize) {
    for &b in src.as_bytes().iter().take(limit) {
        dst.push(match b {
            b'a'..=b'z' => b & !0x20,
            b'A'..=b'Z' | b'0'..=b'9' => b,
            _ => b'_',
        });
    }
}

/// Builds the stored ISO-level name: `NAME.EXT;1` for files (8.3,
/// uppercased), plain `NAME` for directories.
pub(crate) fn iso_name(name: &str, dir: bool) -> Vec<u8> {
    let (stem, ext) = split_name(name);
    let mut out = Vec::new();
    copy_name(&mut out, stem, 8);
    if !dir || !ext.is_empty() {
        out.push(b'.');
    }
    copy_name(&mut out, ext, 3);
    if !dir {
        out.extend_from_slice(b";1");
    }
    out
}

/// Rock-Ridge record ids.
const RR_SP: &[u8; 2] = b"SP";
const RR_RR: &[u8; 2] = b"RR";
const RR_NM: &[u8; 2] = b"NM";
const RR_PX: &[u8; 2] = b"PX";
const RR_CL: &[u8; 2] = b"CL";
const RR_RE: &[u8; 2] = b"RE";

const RR_HAVE_NM: u8 = 8;

/// Parses the Rock-Ridge records trailing a directory record body.
pub(crate) fn rr_read(mut d: &[u8], f: &mut ParsedEntry) -> Result<()> {
    loop {
        if d.len() < 4 || d[0] == 0 {
            return Ok(());
        }
        let len = usize::from(d[2]);
        if len <= 4 || len > d.len() {
            return Err(Error::BadStructure("rock-ridge record length"));
        }
        let (id, payload) = (&d[..2], &d[4..len]);
        log::trace!("iso RR record: {} len:{len}", String::from_utf8_lossy(id));

        match id {
            id if id == RR_NM => {
                let Some((&flags, name)) = payload.split_first() else {
                    return Err(Error::Truncated);
                };
                if flags != 0 {
                    return Err(Error::UnsupportedCodec {
                        what: "rock-ridge NM continuation",
                    });
                }
                f.name = name.to_vec();
            }
            id if id == RR_PX => {
                if payload.len() >= 32 {
                    f.attr = u32::from_le_bytes(
                        payload[0..4].try_into().map_err(|_| Error::Truncated)?,
                    );
                    f.uid = u32::from_le_bytes(
                        payload[16..20].try_into().map_err(|_| Error::Truncated)?,
                    );
                    f.gid = u32::from_le_bytes(
                        payload[24..28].try_into().map_err(|_| Error::Truncated)?,
                    );
                }
            }
            id if id == RR_CL => {
                if payload.len() >= 8 {
                    let child = u32::from_le_bytes(
                        payload[0..4].try_into().map_err(|_| Error::Truncated)?,
                    );
                    f.offset = u64::from(child) * SECTOR as u64;
                    log::trace!("iso RR CL: off:{:#x}", f.offset);
                }
            }
            id if id == RR_RE => {
                f.name.clear();
            }
            _ => {}
        }
        d = &d[len..];
    }
}

fn rr_header(out: &mut Vec<u8>, id: &[u8; 2], data_len: usize) {
    out.extend_from_slice(id);
    out.push((4 + data_len) as u8);
    out.push(1);
}

/// Serialized length of one directory record for the given name and flags.
pub(crate) fn ent_size(name: &str, attr: u32, flags: u32) -> Result<usize> {
    let reserved = name.len() == 1 && (name.as_bytes()[0] <= 1);
    let fnlen = if reserved {
        1
    } else if flags & ENT_JOLIET != 0 {
        text::utf16_len(name)
    } else {
        iso_name(name, attr & ATTR_DIR != 0).len()
    };

    let mut rrlen = 0;
    if flags & ENT_RR != 0 {
        rrlen += 4 + 1; // RR
        if !reserved {
            rrlen += 4 + 1 + name.len(); // NM
        }
        if flags & ENT_RR_SP != 0 {
            rrlen += 4 + 3; // SP
        }
    }

    let total = ent_len(fnlen) + rrlen;
    if total > 255 {
        return Err(Error::NameInvalid("iso directory record over 255 bytes"));
    }
    Ok(total)
}

/// Serializes one directory record, appending to `out`.
pub(crate) fn ent_write(
    out: &mut Vec<u8>,
    name: &str,
    attr: u32,
    off: u64,
    size: u64,
    mtime: i64,
    flags: u32,
) -> Result<usize> {
    let total = ent_size(name, attr, flags)?;
    let reserved = name.len() == 1 && (name.as_bytes()[0] <= 1);

    let stored_name: Vec<u8> = if reserved {
        vec![name.as_bytes()[0]]
    } else if flags & ENT_JOLIET != 0 {
        let mut n = Vec::new();
        text::utf8_to_utf16be(name, &mut n);
        n
    } else {
        iso_name(name, attr & ATTR_DIR != 0)
    };

    let start = out.len();
    out.resize(start + total, 0);
    let ent = &mut out[start..];
    ent[0] = total as u8;
    write32_both(&mut ent[2..10], (off / SECTOR as u64) as u32);
    write32_both(&mut ent[10..18], size as u32);
    date_write(&mut ent[18..25], mtime);
    if attr & ATTR_DIR != 0 {
        ent[25] = FLAG_DIR;
    }
    write16_both(&mut ent[28..32], 1);
    ent[32] = stored_name.len() as u8;
    ent[33..33 + stored_name.len()].copy_from_slice(&stored_name);

    // Rock-Ridge records after the padded name
    if flags & ENT_RR != 0 {
        let mut rr = Vec::new();
        if flags & ENT_RR_SP != 0 {
            rr_header(&mut rr, RR_SP, 3);
            rr.extend_from_slice(&[0xbe, 0xef, 0]);
        }
        rr_header(&mut rr, RR_RR, 1);
        let rr_flags_at = rr.len();
        rr.push(0);
        if !reserved {
            rr_header(&mut rr, RR_NM, 1 + name.len());
            rr.push(0); // NM flags
            rr.extend_from_slice(name.as_bytes());
            rr[rr_flags_at] |= RR_HAVE_NM;
        }
        let rr_at = total - rr.len();
        out[start + rr_at..start + total].copy_from_slice(&rr);
    }
    Ok(total)
}

/// Serializes one path-table record, appending to `out`. Returns its size.
pub(crate) fn path_entry_write(
    out: &mut Vec<u8>,
    name: &str,
    extent: u32,
    parent: u16,
    big_endian: bool,
    joliet: bool,
) -> Result<usize> {
    let stored: Vec<u8> = if name.is_empty() || name == "\0" {
        vec![0]
    } else if joliet {
        let mut n = Vec::new();
        text::utf8_to_utf16be(name, &mut n);
        n
    } else {
        iso_name(name, true)
    };
    let n = 8 + stored.len() + stored.len() % 2;
    if n > 255 {
        return Err(Error::NameInvalid("iso path-table record over 255 bytes"));
    }

    let start = out.len();
    out.resize(start + n, 0);
    let rec = &mut out[start..];
    rec[0] = stored.len() as u8;
    if big_endian {
        rec[2..6].copy_from_slice(&extent.to_be_bytes());
        rec[6..8].copy_from_slice(&parent.to_be_bytes());
    } else {
        rec[2..6].copy_from_slice(&extent.to_le_bytes());
        rec[6..8].copy_from_slice(&parent.to_le_bytes());
    }
    rec[8..8 + stored.len()].copy_from_slice(&stored);
    Ok(n)
}

/// Serialized size of one path-table record.
pub(crate) fn path_entry_size(name: &str, joliet: bool) -> Result<usize> {
    let mut tmp = Vec::new();
    path_entry_write(&mut tmp, name, 0, 0, false, joliet)
}

/// Fields of a primary or Joliet volume descriptor.
#[derive(Debug, Clone, Default)]
pub(crate) struct VolDesc {
    pub joliet: bool,
    pub volume_name: String,
    pub root_dir_off: u64,
    pub root_dir_size: u64,
    pub vol_sectors: u32,
    pub path_table_size: u32,
    pub path_table_off: u32,
    pub path_table_off_be: u32,
}

fn write_padded_name(buf: &mut [u8], s: &str, joliet: bool) {
    if joliet {
        let mut enc = Vec::new();
        text::utf8_to_utf16be(s, &mut enc);
        let n = enc.len().min(buf.len());
        buf[..n].copy_from_slice(&enc[..n]);
        let mut i = n;
        while i + 1 < buf.len() {
            buf[i] = 0;
            buf[i + 1] = b' ';
            i += 2;
        }
    } else {
        let n = s.len().min(buf.len());
        buf[..n].copy_from_slice(&s.as_bytes()[..n]);
        buf[n..].fill(b' ');
    }
}

/// Serializes a 2048-byte volume descriptor into `buf`.
pub(crate) fn voldesc_write(buf: &mut [u8], vd: &VolDesc) -> Result<()> {
    buf.fill(0);
    buf[0] = if vd.joliet { VD_JOLIET } else { VD_PRIMARY };
    buf[1..6].copy_from_slice(b"CD001");
    buf[6] = 1;

    write_padded_name(&mut buf[8..40], SYSTEM_NAME, vd.joliet);
    write_padded_name(&mut buf[40..72], &vd.volume_name, vd.joliet);
    write32_both(&mut buf[80..88], vd.vol_sectors);
    if vd.joliet {
        buf[88..91].copy_from_slice(JOLIET_ESCAPE);
    }
    write16_both(&mut buf[120..124], 1);
    write16_both(&mut buf[124..128], 1);
    write16_both(&mut buf[128..132], SECTOR as u16);
    write32_both(&mut buf[132..140], vd.path_table_size);
    buf[140..144].copy_from_slice(&vd.path_table_off.to_le_bytes());
    buf[148..152].copy_from_slice(&vd.path_table_off_be.to_be_bytes());

    let mut root = Vec::new();
    ent_write(
        &mut root,
        "\0",
        ATTR_DIR,
        vd.root_dir_off,
        vd.root_dir_size,
        0,
        0,
    )?;
    buf[156..156 + root.len()].copy_from_slice(&root);
    Ok(())
}

/// Serializes the terminator volume descriptor.
pub(crate) fn voldesc_term_write(buf: &mut [u8]) {
    buf.fill(0);
    buf[0] = VD_TERMINATOR;
    buf[1..6].copy_from_slice(b"CD001");
    buf[6] = 1;
}

/// Parses a primary/Joliet volume descriptor; returns the root record.
pub(crate) fn voldesc_prim_read(buf: &[u8]) -> Result<ParsedEntry> {
    if &buf[1..6] != b"CD001" {
        return Err(Error::BadMagic { format: "iso" });
    }
    if buf[6] != 1 {
        return Err(Error::UnsupportedVersion {
            format: "iso",
            version: u32::from(buf[6]),
        });
    }
    let block = u16::from_le_bytes([buf[128], buf[129]]);
    if usize::from(block) != SECTOR {
        return Err(Error::UnsupportedCodec {
            what: "iso logical block size other than 2048",
        });
    }

    log::debug!(
        "iso volume descriptor: type:{} vol-size:{} path-tbl-size:{}",
        buf[0],
        u32::from_le_bytes(buf[80..84].try_into().unwrap_or_default()),
        u32::from_le_bytes(buf[132..136].try_into().unwrap_or_default()),
    );

    match ent_read(&buf[156..156 + 34])? {
        Some((root, _)) => Ok(root),
        None => Err(Error::BadStructure("empty root directory record")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_level_names() {
        assert_eq!(iso_name("afile.txt", false), b"AFILE.TXT;1");
        assert_eq!(iso_name("mydirectory", true), b"MYDIRECT");
        assert_eq!(iso_name("no-ext", false), b"NO_EXT.;1");
        assert_eq!(iso_name("longbasename.extra", false), b"LONGBASE.EXT;1");
    }

    #[test]
    fn version_stripping() {
        assert_eq!(strip_version(b"AFILE.TXT;1"), b"AFILE.TXT");
        assert_eq!(strip_version(b"NO_EXT.;1"), b"NO_EXT");
        assert_eq!(strip_version(b"DIRNAME"), b"DIRNAME");
        assert_eq!(strip_version(b"ODD;2"), b"ODD;2");
    }

    #[test]
    fn entry_roundtrip() {
        let mut buf = Vec::new();
        let n = ent_write(
            &mut buf,
            "afile.txt",
            0,
            10 * SECTOR as u64,
            1234,
            1_600_000_000,
            0,
        )
        .unwrap();
        assert_eq!(n, buf.len());

        let (f, len) = ent_read(&buf).unwrap().unwrap();
        assert_eq!(len, n);
        assert_eq!(f.offset, 10 * SECTOR as u64);
        assert_eq!(f.size, 1234);
        assert_eq!(f.attr, 0);
        assert_eq!(strip_version(&f.name), b"AFILE.TXT");
        assert_eq!(f.mtime, 1_600_000_000);
    }

    #[test]
    fn entry_with_rock_ridge_name() {
        let mut buf = Vec::new();
        ent_write(
            &mut buf,
            "MixedCase.txt",
            0,
            SECTOR as u64,
            5,
            0,
            ENT_RR,
        )
        .unwrap();

        let (mut f, len) = ent_read(&buf).unwrap().unwrap();
        let body = ent_len(usize::from(buf[32]));
        rr_read(&buf[body..len], &mut f).unwrap();
        assert_eq!(f.name, b"MixedCase.txt");
    }

    #[test]
    fn self_entry_with_sp() {
        let mut buf = Vec::new();
        ent_write(
            &mut buf,
            "\0",
            ATTR_DIR,
            SECTOR as u64,
            SECTOR as u64,
            0,
            ENT_RR | ENT_RR_SP,
        )
        .unwrap();
        let (f, len) = ent_read(&buf).unwrap().unwrap();
        assert!(f.name.is_empty());
        assert_eq!(f.attr, ATTR_DIR);
        // SP record directly follows the record body
        let rr = &buf[ent_len(1)..len];
        assert_eq!(&rr[..2], b"SP");
        assert_eq!(&rr[4..6], [0xbe, 0xef]);
    }

    #[test]
    fn joliet_entry_name() {
        let mut buf = Vec::new();
        ent_write(
            &mut buf,
            "naïve.txt",
            0,
            0,
            1,
            0,
            ENT_JOLIET,
        )
        .unwrap();
        let (f, _) = ent_read(&buf).unwrap().unwrap();
        assert_eq!(crate::text::utf16be_to_utf8(&f.name).unwrap(), "naïve.txt");
    }

    #[test]
    fn voldesc_roundtrip() {
        let vd = VolDesc {
            joliet: false,
            volume_name: "CDROM".into(),
            root_dir_off: 23 * SECTOR as u64,
            root_dir_size: SECTOR as u64,
            vol_sectors: 100,
            path_table_size: 10,
            path_table_off: 19,
            path_table_off_be: 20,
        };
        let mut buf = vec![0u8; SECTOR];
        voldesc_write(&mut buf, &vd).unwrap();
        assert_eq!(buf[0], VD_PRIMARY);

        let root = voldesc_prim_read(&buf).unwrap();
        assert_eq!(root.offset, 23 * SECTOR as u64);
        assert_eq!(root.size, SECTOR as u64);
        assert!(root.attr & ATTR_DIR != 0);
    }

    #[test]
    fn path_entry_layout() {
        let mut buf = Vec::new();
        let n = path_entry_write(&mut buf, "mydirectory", 23, 1, false, false).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(buf[0], 8); // "MYDIRECT"
        assert_eq!(u32::from_le_bytes(buf[2..6].try_into().unwrap()), 23);
        assert_eq!(u16::from_le_bytes(buf[6..8].try_into().unwrap()), 1);
    }
}
