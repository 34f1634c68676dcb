//! On-disk structures and metadata grammar of the `.7z` format.

use crate::archive_path::normalize_name;
use crate::checksum::Crc32;
use crate::text;
use crate::timestamp::Timestamp;
use crate::varint::{read_byte, sevenz_read};
use crate::{Error, Result};

/// Signature header length.
pub(crate) const GHDR_LEN: usize = 32;

pub(crate) const SIGNATURE: &[u8; 6] = b"7z\xbc\xaf\x27\x1c";

/// Block ids.
pub(crate) mod block_id {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const ADDITIONAL_STREAMS: u8 = 0x03;
    pub const MAIN_STREAMS: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0a;
    pub const FOLDER: u8 = 0x0b;
    pub const UNPACK_SIZE: u8 = 0x0c;
    pub const NUM_UNPACK_STREAM: u8 = 0x0d;
    pub const EMPTY_STREAM: u8 = 0x0e;
    pub const EMPTY_FILE: u8 = 0x0f;
    pub const NAME: u8 = 0x11;
    pub const MTIME: u8 = 0x14;
    pub const WIN_ATTRIBUTES: u8 = 0x15;
    pub const ENCODED_HEADER: u8 = 0x17;
    pub const DUMMY: u8 = 0x19;
}

/// One archive entry.
#[derive(Debug, Clone, Default)]
pub struct SevenZEntry {
    /// Entry name (normalized).
    pub name: String,
    /// Modification time.
    pub mtime: Timestamp,
    /// Low byte of the Windows attribute word; `0x10` marks a directory.
    pub attr: u32,
    /// CRC-32 of the uncompressed data.
    pub crc: u32,
    /// Offset within the folder's unpacked stream.
    pub offset: u64,
    /// Uncompressed size.
    pub size: u64,
}

impl SevenZEntry {
    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        self.attr & 0x10 != 0
    }
}

/// Coder methods recognized in folder definitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Method {
    #[default]
    Unknown,
    Store,
    Lzma1,
    X86,
    X86Bcj2,
    Deflate,
    Lzma2,
}

impl Method {
    fn from_id(id: &[u8]) -> Self {
        match id {
            [0x00] => Self::Store,
            [0x03, 0x01, 0x01] => Self::Lzma1,
            [0x03, 0x03, 0x01, 0x03] => Self::X86,
            [0x03, 0x03, 0x01, 0x1b] => Self::X86Bcj2,
            [0x04, 0x01, 0x08] => Self::Deflate,
            [0x21] => Self::Lzma2,
            _ => Self::Unknown,
        }
    }
}

/// One coder within a folder.
#[derive(Debug, Clone, Default)]
pub(crate) struct Coder {
    pub method: Method,
    pub props: Vec<u8>,
    /// Packed stream window, when this coder consumes one directly.
    pub stream_off: u64,
    pub stream_size: u64,
    pub unpack_size: u64,
    /// Index (1-based) of the coder whose output feeds this one.
    pub input_coder: u8,
}

/// A chain of coders over one packed stream, plus the files cut from its
/// unpacked output.
#[derive(Debug, Clone, Default)]
pub(crate) struct Folder {
    pub coders: Vec<Coder>,
    pub crc: u32,
    pub files: Vec<SevenZEntry>,
    pub ifile: usize,
    pub unpack_size: u64,
    /// Present on the synthetic final folder holding empty files: a
    /// bit per archive file, MSB first, set for empty entries.
    pub empty_bitmap: Option<Vec<u8>>,
}

/// Signature-header fields.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GlobalHeader {
    pub meta_off: u64,
    pub meta_size: u64,
    pub meta_crc: u32,
}

/// Parses the 32-byte signature header.
pub(crate) fn global_header_read(buf: &[u8]) -> Result<GlobalHeader> {
    if &buf[..6] != SIGNATURE {
        return Err(Error::BadMagic { format: "7z" });
    }
    if buf[6] != 0 {
        return Err(Error::UnsupportedVersion {
            format: "7z",
            version: u32::from(buf[6]),
        });
    }
    let stored = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let actual = Crc32::compute(&buf[12..32]);
    if stored != actual {
        return Err(Error::BadHeaderCrc {
            offset: 8,
            expected: stored,
            actual,
        });
    }
    let h = GlobalHeader {
        meta_off: u64::from_le_bytes(buf[12..20].try_into().map_err(|_| Error::Truncated)?)
            + GHDR_LEN as u64,
        meta_size: u64::from_le_bytes(buf[20..28].try_into().map_err(|_| Error::Truncated)?),
        meta_crc: u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
    };
    log::debug!("7z meta: off:{:#x} size:{:#x}", h.meta_off, h.meta_size);
    Ok(h)
}

/// Metadata being accumulated while the block stream is parsed.
#[derive(Debug, Default)]
pub(crate) struct Meta {
    /// Packed streams not yet claimed by a folder: `(offset, size)`.
    pub streams: Vec<(u64, u64)>,
    pub folders: Vec<Folder>,
}

impl Meta {
    /// The synthetic empty-files folder, when present.
    fn empty_folder_index(&self) -> Option<usize> {
        match self.folders.last() {
            Some(f) if f.empty_bitmap.is_some() => Some(self.folders.len() - 1),
            _ => None,
        }
    }
}

/// Grammar flags.
pub(crate) const F_REQ: u32 = 0x0200;
pub(crate) const F_SIZE: u32 = 0x0800;
pub(crate) const F_SELF: u32 = 0x1000;
pub(crate) const F_MULTI: u32 = 0x2000;

pub(crate) const fn prio(n: u32) -> u32 {
    n << 24
}

pub(crate) fn get_prio(flags: u32) -> u32 {
    flags >> 24
}

pub(crate) type Handler = fn(&mut Meta, &mut &[u8]) -> Result<()>;

/// What a block id maps to at one grammar level.
pub(crate) enum Payload {
    /// Leaf block parsed by a handler.
    Handler(Handler),
    /// Nested block with its own child table.
    Children(&'static [BlockSpec]),
    /// `End` marker.
    None,
}

/// One row of a grammar level.
pub(crate) struct BlockSpec {
    pub id: u8,
    pub flags: u32,
    pub payload: Payload,
}

pub(crate) static CTX_TOP: &[BlockSpec] = &[
    BlockSpec {
        id: block_id::HEADER,
        flags: 0,
        payload: Payload::Children(CTX_HEADER),
    },
    BlockSpec {
        id: block_id::ENCODED_HEADER,
        flags: 0,
        payload: Payload::Children(CTX_STREAMS),
    },
];

static CTX_HEADER: &[BlockSpec] = &[
    BlockSpec {
        id: block_id::ADDITIONAL_STREAMS,
        flags: 0,
        payload: Payload::Children(CTX_STREAMS),
    },
    BlockSpec {
        id: block_id::MAIN_STREAMS,
        flags: F_REQ | prio(1),
        payload: Payload::Children(CTX_STREAMS),
    },
    BlockSpec {
        id: block_id::FILES_INFO,
        flags: prio(2),
        payload: Payload::Children(CTX_FILES),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

static CTX_STREAMS: &[BlockSpec] = &[
    BlockSpec {
        id: block_id::PACK_INFO,
        flags: F_REQ | prio(1),
        payload: Payload::Children(CTX_PACK_INFO),
    },
    BlockSpec {
        id: block_id::UNPACK_INFO,
        flags: F_REQ | prio(2),
        payload: Payload::Children(CTX_UNPACK_INFO),
    },
    BlockSpec {
        id: block_id::SUBSTREAMS_INFO,
        flags: prio(3),
        payload: Payload::Children(CTX_SUBSTREAMS),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

static CTX_PACK_INFO: &[BlockSpec] = &[
    BlockSpec {
        id: 0xff,
        flags: F_SELF,
        payload: Payload::Handler(pack_info_read),
    },
    BlockSpec {
        id: block_id::SIZE,
        flags: F_REQ,
        payload: Payload::Handler(pack_sizes_read),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

static CTX_UNPACK_INFO: &[BlockSpec] = &[
    BlockSpec {
        id: block_id::FOLDER,
        flags: prio(1),
        payload: Payload::Handler(folders_read),
    },
    BlockSpec {
        id: block_id::UNPACK_SIZE,
        flags: prio(2),
        payload: Payload::Handler(unpack_sizes_read),
    },
    BlockSpec {
        id: block_id::CRC,
        flags: 0,
        payload: Payload::Handler(folder_crcs_read),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

static CTX_SUBSTREAMS: &[BlockSpec] = &[
    BlockSpec {
        id: block_id::NUM_UNPACK_STREAM,
        flags: prio(1),
        payload: Payload::Handler(stream_files_read),
    },
    BlockSpec {
        id: block_id::SIZE,
        flags: prio(2),
        payload: Payload::Handler(file_sizes_read),
    },
    BlockSpec {
        id: block_id::CRC,
        flags: 0,
        payload: Payload::Handler(file_crcs_read),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

static CTX_FILES: &[BlockSpec] = &[
    BlockSpec {
        id: 0xff,
        flags: F_SELF,
        payload: Payload::Handler(files_info_read),
    },
    BlockSpec {
        id: block_id::EMPTY_STREAM,
        flags: F_SIZE | prio(1),
        payload: Payload::Handler(empty_streams_read),
    },
    BlockSpec {
        id: block_id::EMPTY_FILE,
        flags: F_SIZE | prio(2),
        payload: Payload::Handler(skip_read),
    },
    BlockSpec {
        id: block_id::NAME,
        flags: F_REQ | F_SIZE,
        payload: Payload::Handler(names_read),
    },
    BlockSpec {
        id: block_id::MTIME,
        flags: F_SIZE,
        payload: Payload::Handler(mtimes_read),
    },
    BlockSpec {
        id: block_id::WIN_ATTRIBUTES,
        flags: F_SIZE,
        payload: Payload::Handler(attributes_read),
    },
    BlockSpec {
        id: block_id::DUMMY,
        flags: F_SIZE | F_MULTI,
        payload: Payload::Handler(skip_read),
    },
    BlockSpec {
        id: block_id::END,
        flags: 0,
        payload: Payload::None,
    },
];

/*
varint PackPos
varint NumPackStreams
*/
fn pack_info_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    let off = sevenz_read(d)? + GHDR_LEN as u64;
    let n = sevenz_read(d)?;
    log::trace!("7z pack info: streams:{n} offset:{off:#x}");
    if n == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z archive with no packed streams",
        });
    }
    let n = usize::try_from(n).map_err(|_| Error::BadVarint)?;
    meta.streams = vec![(0, 0); n];
    meta.streams[0].0 = off;
    Ok(())
}

/*
varint PackSize[NumPackStreams]
*/
fn pack_sizes_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    let mut off = meta.streams.first().map_or(0, |s| s.0);
    for i in 0..meta.streams.len() {
        let size = sevenz_read(d)?;
        log::trace!("7z stream#{i} size:{size:#x}");
        meta.streams[i] = (off, size);
        off += size;
    }
    Ok(())
}

const FOLDER_F_COMPLEX: u8 = 0x10;
const FOLDER_F_ATTRS: u8 = 0x20;

/// Reads one folder definition, claiming its packed streams.
fn folder_read(d: &mut &[u8], streams: &mut Vec<(u64, u64)>) -> Result<Folder> {
    let coders_n = sevenz_read(d)?;
    log::trace!("7z folder: coders:{coders_n}");
    if coders_n == 0 || coders_n > 4 {
        return Err(Error::BadStructure("7z folder coder count"));
    }
    let coders_n = coders_n as usize;

    let mut fo = Folder::default();
    let mut in_streams = coders_n as u64;

    for _ in 0..coders_n {
        let mut flags = read_byte(d)?;
        let method_len = usize::from(flags & 0x0f);
        flags &= 0xf0;
        if d.len() < method_len {
            return Err(Error::Truncated);
        }
        let mut coder = Coder {
            method: Method::from_id(&d[..method_len]),
            ..Coder::default()
        };
        log::trace!("7z coder: {:02x?} flags:{flags:#x}", &d[..method_len]);
        *d = &d[method_len..];

        if flags & FOLDER_F_COMPLEX != 0 {
            let num_in = sevenz_read(d)?;
            let num_out = sevenz_read(d)?;
            log::trace!("7z complex coder: in:{num_in} out:{num_out}");
            if num_in == 0 || num_in > 4 || num_out != 1 {
                return Err(Error::BadStructure("7z complex coder stream counts"));
            }
            in_streams += num_in - 1;
            flags &= !FOLDER_F_COMPLEX;
        }

        if flags & FOLDER_F_ATTRS != 0 {
            let n = sevenz_read(d)?;
            let n = usize::try_from(n).map_err(|_| Error::BadVarint)?;
            if d.len() < n {
                return Err(Error::Truncated);
            }
            coder.props = d[..n].to_vec();
            *d = &d[n..];
            flags &= !FOLDER_F_ATTRS;
        }

        if flags != 0 {
            return Err(Error::BadStructure("unknown 7z coder flags"));
        }
        fo.coders.push(coder);
    }

    let bonds = coders_n - 1;
    for i in 0..bonds {
        let in_index = sevenz_read(d)?;
        let out_index = sevenz_read(d)?;
        log::trace!("7z bond: in:{in_index} out:{out_index}");
        fo.coders[i + 1].input_coder = (i + 1) as u8;
    }

    let pack_streams = in_streams - bonds as u64;
    if pack_streams > streams.len() as u64 {
        return Err(Error::BadStructure("7z folder claims missing pack streams"));
    }
    let pack_streams = pack_streams as usize;
    if pack_streams != 1 {
        for _ in 0..pack_streams {
            let idx = sevenz_read(d)?;
            log::trace!("7z pack stream index:{idx}");
        }
    }

    for (i, &(off, size)) in streams[..pack_streams].iter().enumerate() {
        if i < fo.coders.len() {
            fo.coders[i].stream_off = off;
            fo.coders[i].stream_size = size;
        }
    }
    streams.drain(..pack_streams);
    Ok(fo)
}

/*
varint NumFolders
byte External
folder definitions
*/
fn folders_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    let folders = sevenz_read(d)?;
    log::trace!("7z folders:{folders}");
    if read_byte(d)? != 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z external folder definitions",
        });
    }

    let mut streams = std::mem::take(&mut meta.streams);
    for _ in 0..folders {
        let fo = folder_read(d, &mut streams)?;
        meta.folders.push(fo);
    }
    Ok(())
}

/*
varint UnPackSize[folders][folder.coders]
*/
fn unpack_sizes_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    for fo in &mut meta.folders {
        let mut last = 0;
        for coder in &mut fo.coders {
            last = sevenz_read(d)?;
            coder.unpack_size = last;
        }
        fo.unpack_size = last;
        log::trace!("7z folder unpacked size:{last:#x}");
    }
    Ok(())
}

/*
byte AllAreDefined (must be 1)
u32 CRC[folders]
*/
fn folder_crcs_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    if read_byte(d)? == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z partially defined folder digests",
        });
    }
    for fo in &mut meta.folders {
        if d.len() < 4 {
            return Err(Error::Truncated);
        }
        fo.crc = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
        *d = &d[4..];
    }
    Ok(())
}

/*
varint NumUnPackStreamsInFolders[folders]
*/
fn stream_files_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    for fo in &mut meta.folders {
        let n = sevenz_read(d)?;
        log::trace!("7z folder files:{n}");
        if n == 0 {
            return Err(Error::BadStructure("7z folder with zero streams"));
        }
        let n = usize::try_from(n).map_err(|_| Error::BadVarint)?;
        fo.files = vec![SevenZEntry::default(); n];
    }
    Ok(())
}

/*
varint UnPackSize[folders][folder.files - 1]; the last file gets the rest
*/
fn file_sizes_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    for fo in &mut meta.folders {
        let mut off = 0u64;
        let count = fo.files.len();
        for (i, f) in fo.files.iter_mut().enumerate() {
            let size = if i + 1 == count {
                fo.unpack_size - off
            } else {
                sevenz_read(d)?
            };
            f.offset = off;
            f.size = size;
            off += size;
            if off > fo.unpack_size {
                return Err(Error::BadStructure("7z substream sizes exceed the folder"));
            }
        }
    }
    Ok(())
}

/*
byte AllAreDefined (must be 1)
u32 CRC[files]
*/
fn file_crcs_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    if read_byte(d)? == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z partially defined file digests",
        });
    }
    for fo in &mut meta.folders {
        if fo.files.is_empty() {
            // no NumUnPackStream/Size records: one stored file per folder
            fo.files = vec![SevenZEntry {
                size: fo.unpack_size,
                ..SevenZEntry::default()
            }];
        }
        for f in &mut fo.files {
            if d.len() < 4 {
                return Err(Error::Truncated);
            }
            f.crc = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
            *d = &d[4..];
        }
    }
    Ok(())
}

/*
varint NumFiles
*/
fn files_info_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    let n = sevenz_read(d)?;
    log::trace!("7z files:{n}");
    if n == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z archive with zero files",
        });
    }

    let have: u64 = meta.folders.iter().map(|f| f.files.len() as u64).sum();
    if n < have {
        return Err(Error::BadStructure("7z file count below stream count"));
    }
    if n > have {
        // extra entries are empty files and directories in a synthetic
        // final folder
        let extra = usize::try_from(n - have).map_err(|_| Error::BadVarint)?;
        let nbytes = usize::try_from(n.div_ceil(8)).map_err(|_| Error::BadVarint)?;
        meta.folders.push(Folder {
            files: vec![SevenZEntry::default(); extra],
            empty_bitmap: Some(vec![0u8; nbytes]),
            ..Folder::default()
        });
    }
    Ok(())
}

/*
bit IsEmptyStream[NumFiles]
*/
fn empty_streams_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    let count: usize = d
        .iter()
        .map(|b| usize::from(b.count_ones() as u8))
        .sum();

    let Some(last) = meta.folders.last_mut() else {
        return Err(Error::BadStructure("7z empty-stream bits with no folders"));
    };
    let Some(bitmap) = last.empty_bitmap.as_mut() else {
        return Err(Error::BadStructure("7z empty-stream bits with no empty files"));
    };
    if count != last.files.len() {
        return Err(Error::BadStructure("7z empty-stream bit count mismatch"));
    }
    let n = d.len().min(bitmap.len());
    bitmap[..n].copy_from_slice(&d[..n]);
    *d = &[];
    Ok(())
}

fn skip_read(_meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    *d = &[];
    Ok(())
}

/// Tests bit `i` (MSB first) of an empty-entries bitmap.
fn bit_test(bitmap: &[u8], i: usize) -> bool {
    bitmap
        .get(i / 8)
        .is_some_and(|b| b & (0x80 >> (i % 8)) != 0)
}

/// Walks file slots in archive order, splitting them between regular
/// folders and the synthetic empty-files folder.
fn for_each_file_slot(
    meta: &mut Meta,
    mut f: impl FnMut(&mut SevenZEntry, &mut &[u8]) -> Result<()>,
    d: &mut &[u8],
) -> Result<()> {
    let empty_idx = meta.empty_folder_index();
    let bitmap = empty_idx
        .and_then(|i| meta.folders[i].empty_bitmap.clone());

    let mut counter = 0usize;
    let mut iempty = 0usize;

    let nfolders = meta.folders.len();
    for ifo in 0..nfolders {
        if Some(ifo) == empty_idx {
            // remaining slots fill the empty folder in order
            let folder = &mut meta.folders[ifo];
            for i in iempty..folder.files.len() {
                f(&mut folder.files[i], d)?;
            }
            break;
        }

        let mut i = 0;
        while i != meta.folders[ifo].files.len() {
            let goes_to_empty = match (&bitmap, empty_idx) {
                (Some(bits), Some(_)) => bit_test(bits, counter),
                _ => false,
            };
            if goes_to_empty {
                let Some(e) = empty_idx else {
                    return Err(Error::BadStructure("7z empty bitmap without folder"));
                };
                let entry = &mut meta.folders[e].files[iempty];
                f(entry, d)?;
                iempty += 1;
            } else {
                f(&mut meta.folders[ifo].files[i], d)?;
                i += 1;
            }
            counter += 1;
        }
    }
    Ok(())
}

/*
byte External
{ utf16le name, NUL } [NumFiles]
*/
fn names_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    if read_byte(d)? != 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z external file names",
        });
    }
    for_each_file_slot(
        meta,
        |entry, d| {
            let nul = d
                .chunks_exact(2)
                .position(|c| c == [0, 0])
                .ok_or(Error::Truncated)?;
            let raw = &d[..nul * 2];
            let name = text::utf16le_to_utf8(raw)?;
            entry.name = normalize_name(name.as_bytes());
            log::trace!("7z name: {}", entry.name);
            *d = &d[nul * 2 + 2..];
            Ok(())
        },
        d,
    )
}

/*
byte AllAreDefined (must be 1)
byte External
u64 FILETIME [NumFiles]
*/
fn mtimes_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    if read_byte(d)? == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z partially defined times",
        });
    }
    if read_byte(d)? != 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z external times",
        });
    }
    for_each_file_slot(
        meta,
        |entry, d| {
            if d.len() < 8 {
                return Err(Error::Truncated);
            }
            let ft = u64::from_le_bytes(d[..8].try_into().map_err(|_| Error::Truncated)?);
            entry.mtime = Timestamp::from_filetime(ft);
            *d = &d[8..];
            Ok(())
        },
        d,
    )
}

/*
byte AllAreDefined (must be 1)
byte External
u32 Attributes [NumFiles]
*/
fn attributes_read(meta: &mut Meta, d: &mut &[u8]) -> Result<()> {
    if read_byte(d)? == 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z partially defined attributes",
        });
    }
    if read_byte(d)? != 0 {
        return Err(Error::UnsupportedCodec {
            what: "7z external attributes",
        });
    }
    for_each_file_slot(
        meta,
        |entry, d| {
            if d.len() < 4 {
                return Err(Error::Truncated);
            }
            let attr = u32::from_le_bytes(d[..4].try_into().map_err(|_| Error::Truncated)?);
            entry.attr = attr & 0xff;
            *d = &d[4..];
            Ok(())
        },
        d,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_header_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(SIGNATURE);
        buf.extend_from_slice(&[0, 4]); // version
        let mut tail = Vec::new();
        tail.extend_from_slice(&100u64.to_le_bytes());
        tail.extend_from_slice(&50u64.to_le_bytes());
        tail.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        buf.extend_from_slice(&Crc32::compute(&tail).to_le_bytes());
        buf.extend_from_slice(&tail);

        let h = global_header_read(&buf).unwrap();
        assert_eq!(h.meta_off, 100 + 32);
        assert_eq!(h.meta_size, 50);
        assert_eq!(h.meta_crc, 0xdeadbeef);
    }

    #[test]
    fn global_header_rejects_corruption() {
        let mut buf = vec![0u8; 32];
        buf[..6].copy_from_slice(SIGNATURE);
        assert!(matches!(
            global_header_read(&buf),
            Err(Error::BadHeaderCrc { .. })
        ));
        buf[0] = 0;
        assert!(matches!(
            global_header_read(&buf),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn folder_with_single_store_coder() {
        let mut meta = Meta::default();
        let mut d: &[u8] = &[
            0x01, // pack pos
            0x01, // one stream
        ];
        pack_info_read(&mut meta, &mut d).unwrap();
        let mut d: &[u8] = &[0x10];
        pack_sizes_read(&mut meta, &mut d).unwrap();
        assert_eq!(meta.streams, vec![(GHDR_LEN as u64 + 1, 0x10)]);

        // NumFolders=1, External=0, one coder: idlen 1, id 0x00 (store)
        let mut d: &[u8] = &[0x01, 0x00, 0x01, 0x00];
        folders_read(&mut meta, &mut d).unwrap();
        assert_eq!(meta.folders.len(), 1);
        assert_eq!(meta.folders[0].coders[0].method, Method::Store);
        assert_eq!(meta.folders[0].coders[0].stream_off, GHDR_LEN as u64 + 1);
        assert_eq!(meta.folders[0].coders[0].stream_size, 0x10);
    }

    #[test]
    fn empty_bitmap_bit_order() {
        assert!(bit_test(&[0x80], 0));
        assert!(bit_test(&[0x40], 1));
        assert!(bit_test(&[0x01], 7));
        assert!(bit_test(&[0x00, 0x80], 8));
        assert!(!bit_test(&[0x80], 1));
    }
}
