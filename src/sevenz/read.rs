//! Streaming `.7z` reader.

use crate::checksum::Crc32;
use crate::event::ReadEvent;
use crate::filter::bcj::BcjDecode;
use crate::filter::bounds::Bounds;
use crate::filter::input::InputSource;
use crate::filter::{Filter, PipeEvent, Pipeline};
use crate::gather::Gather;
use crate::{Error, Result};

#[cfg(feature = "deflate")]
use crate::filter::inflate::Inflate;
use crate::filter::lzma::LzmaDecode;

use super::fmt::{
    self, BlockSpec, CTX_TOP, F_MULTI, F_REQ, F_SELF, F_SIZE, Folder, GHDR_LEN, Meta, Method,
    Payload, SevenZEntry, block_id, get_prio,
};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    GlobalHeader,
    MetaData,
    BlockId,
    MetaUnpack,
    FileStart,
    FileData,
    FileDoneEmpty,
    NextFile,
}

/// One level of the grammar stack.
struct Level {
    table: &'static [BlockSpec],
    id: u8,
    used: u32,
    prio: u32,
}

impl Level {
    fn new(table: &'static [BlockSpec], id: u8) -> Self {
        Self {
            table,
            id,
            used: 0,
            prio: 0,
        }
    }
}

/// Pull-style `.7z` reader.
///
/// After the metadata is parsed (`Done` event), iterate the archive with
/// [`SevenZReader::next_file`]: each call announces the next entry, and
/// `process` then streams and CRC-checks its data.
pub struct SevenZReader {
    state: State,
    gather: Gather,
    offset: u64,
    meta_crc: u32,
    gdata: Vec<u8>,
    gpos: usize,
    levels: Vec<Level>,
    meta: Meta,
    cur_folder: Option<usize>,
    pipeline: Option<Pipeline>,
    crc: Crc32,
    hdr_packed: bool,
    meta_buf: Vec<u8>,
}

impl Default for SevenZReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_block<'t>(
    table: &'t [BlockSpec],
    id: u8,
    used: &mut u32,
    prio_state: &mut u32,
) -> Result<&'t BlockSpec> {
    for (i, blk) in table.iter().enumerate() {
        if blk.flags & F_SELF != 0 || blk.id != id {
            continue;
        }
        if *used & (1 << i) != 0 && blk.flags & F_MULTI == 0 {
            return Err(Error::BadStructure("duplicate 7z block"));
        }
        *used |= 1 << i;

        let p = get_prio(blk.flags);
        if p != 0 {
            if p > *prio_state + 1 {
                return Err(Error::BadStructure("7z blocks out of order"));
            }
            *prio_state = p;
        }
        return Ok(blk);
    }
    Err(Error::BadStructure("unknown 7z block id"))
}

fn check_required(level: &Level) -> Result<()> {
    for (i, blk) in level.table.iter().enumerate() {
        if blk.flags & F_REQ != 0 && level.used & (1 << i) == 0 {
            return Err(Error::BadStructure("missing required 7z block"));
        }
    }
    Ok(())
}

impl SevenZReader {
    /// Creates a reader.
    pub fn new() -> Self {
        Self {
            state: State::Start,
            gather: Gather::new(),
            offset: 0,
            meta_crc: 0,
            gdata: Vec::new(),
            gpos: 0,
            levels: Vec::new(),
            meta: Meta::default(),
            cur_folder: None,
            pipeline: None,
            crc: Crc32::new(),
            hdr_packed: false,
            meta_buf: Vec::new(),
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Advances to the next entry, in archive order.
    ///
    /// Returns `None` after the last entry. The returned entry's data is
    /// streamed by the following `process` calls.
    pub fn next_file(&mut self) -> Option<&SevenZEntry> {
        let mut cur = self.cur_folder?;

        if self.meta.folders[cur].ifile == self.meta.folders[cur].files.len() {
            if cur + 1 == self.meta.folders.len() {
                return None;
            }
            self.pipeline = None;
            self.meta.folders[cur].ifile = 0;
            cur += 1;
            self.cur_folder = Some(cur);
        }

        let folder = &mut self.meta.folders[cur];
        let i = folder.ifile;
        folder.ifile += 1;
        self.state = State::FileStart;
        Some(&self.meta.folders[cur].files[i])
    }

    fn fill(&mut self, input: &mut &[u8]) -> bool {
        self.offset += self.gather.fill(input) as u64;
        self.gather.ready()
    }

    /// Builds the decode pipeline for a folder:
    /// `input -> (unpack) -> (x86) -> bounds`.
    fn filters_create(folder: &Folder) -> Result<Pipeline> {
        let mut filters: Vec<Filter> = Vec::new();

        for (i, coder) in folder.coders.iter().enumerate() {
            if coder.stream_off != 0 || coder.stream_size != 0 {
                if !filters.is_empty() || coder.input_coder != 0 {
                    return Err(Error::UnsupportedCodec {
                        what: "7z folder with multiple packed streams",
                    });
                }
                filters.push(Filter::Input(InputSource::new(
                    coder.stream_off,
                    coder.stream_size,
                )));
            } else if usize::from(coder.input_coder) != i {
                return Err(Error::UnsupportedCodec {
                    what: "7z coder chain that is not a simple pipeline",
                });
            }

            match coder.method {
                Method::Store => continue,
                Method::Lzma1 => filters.push(Filter::Lzma(LzmaDecode::lzma1(
                    &coder.props,
                    coder.unpack_size,
                )?)),
                Method::Lzma2 => {
                    filters.push(Filter::Lzma(LzmaDecode::lzma2(&coder.props)?));
                }
                #[cfg(feature = "deflate")]
                Method::Deflate => filters.push(Filter::Inflate(Inflate::new())),
                Method::X86 => filters.push(Filter::Bcj(BcjDecode::new())),
                Method::X86Bcj2 => {
                    return Err(Error::UnsupportedCodec {
                        what: "7z BCJ2 coder",
                    });
                }
                _ => {
                    return Err(Error::UnsupportedCodec {
                        what: "7z coder method",
                    });
                }
            }
        }

        filters.push(Filter::Bounds(Bounds::new(0, 0)));
        Ok(Pipeline::new(filters))
    }

    /// Prepares unpacking of an encoded (compressed) header.
    fn prep_unpack_header(&mut self) -> Result<()> {
        if self.hdr_packed {
            return Err(Error::BadStructure("7z header packed twice"));
        }
        let Some(folder) = self.meta.folders.first_mut() else {
            return Err(Error::BadStructure("7z encoded header without a folder"));
        };
        if !folder.files.is_empty() {
            return Err(Error::BadStructure("7z files inside an encoded header"));
        }
        folder.files.push(SevenZEntry {
            size: folder.unpack_size,
            crc: folder.crc,
            ..SevenZEntry::default()
        });
        folder.ifile = 1;

        let mut pipeline = Self::filters_create(folder)?;
        pipeline.set_bounds(0, folder.unpack_size);
        self.pipeline = Some(pipeline);
        self.crc.reset();
        self.hdr_packed = true;
        self.cur_folder = Some(0);
        self.meta_buf.clear();
        Ok(())
    }

    /// Prepares unpacking of the current file's data.
    fn prep_unpack_file(&mut self) -> Result<()> {
        let Some(cur) = self.cur_folder else {
            return Err(Error::NotReady("no current 7z file"));
        };
        let folder = &self.meta.folders[cur];
        let f = &folder.files[folder.ifile - 1];
        log::debug!(
            "7z unpacking '{}' size:{:#x} offset:{:#x} crc:{:#010x}",
            f.name,
            f.size,
            f.offset,
            f.crc
        );

        if folder.coders.first().is_none_or(|c| c.stream_off == 0) {
            self.state = State::FileDoneEmpty;
            return Ok(());
        }

        let (off, size) = (f.offset, f.size);
        self.crc.reset();
        if self.pipeline.is_none() {
            self.pipeline = Some(Self::filters_create(folder)?);
        }
        if let Some(p) = self.pipeline.as_mut() {
            p.set_bounds(off, size);
        }
        self.state = State::FileData;
        Ok(())
    }

    /// Runs one pipeline step against the caller input.
    fn pipe_step(&mut self, input: &mut &[u8]) -> Result<Option<PipeEvent>> {
        let Self {
            pipeline, offset, ..
        } = self;
        let Some(p) = pipeline.as_mut() else {
            return Err(Error::NotReady("no active 7z pipeline"));
        };
        p.step(input, offset)
    }

    /// Parses one block from the gathered metadata.
    fn parse_block(&mut self) -> Result<()> {
        let mut d: &[u8] = &self.gdata[self.gpos..];
        let id64 = {
            let (v, n) = varint::sevenz_decode(d)?;
            if n != 1 {
                return Err(Error::BadStructure("7z block id is not a single byte"));
            }
            d = &d[1..];
            v
        };
        let id = id64 as u8;
        log::trace!("7z block {id:#04x} at meta offset {:#x}", self.gpos);

        if id == block_id::END {
            if self.levels.len() <= 1 {
                return Err(Error::BadStructure("unexpected 7z end marker"));
            }
            let level = match self.levels.pop() {
                Some(l) => l,
                None => return Err(Error::BadStructure("7z level stack underflow")),
            };
            check_required(&level)?;
            self.gpos += 1;

            if level.id == block_id::ENCODED_HEADER {
                self.prep_unpack_header()?;
                self.state = State::MetaUnpack;
            }
            return Ok(());
        }

        let Some(level) = self.levels.last_mut() else {
            return Err(Error::BadStructure("7z level stack underflow"));
        };
        let blk = find_block(level.table, id, &mut level.used, &mut level.prio)?;

        let mut consumed_prefix = 1usize;
        let mut sized: Option<usize> = None;
        if blk.flags & F_SIZE != 0 {
            let (size, n) = varint::sevenz_decode(d)?;
            d = &d[n..];
            consumed_prefix += n;
            let size = usize::try_from(size).map_err(|_| Error::BadVarint)?;
            if d.len() < size {
                return Err(Error::Truncated);
            }
            sized = Some(size);
        }

        let handler = match &blk.payload {
            Payload::Children(children) => {
                self.levels.push(Level::new(children, id));
                children
                    .first()
                    .filter(|c| c.flags & F_SELF != 0)
                    .and_then(|c| match &c.payload {
                        Payload::Handler(h) => Some(*h),
                        _ => None,
                    })
            }
            Payload::Handler(h) => Some(*h),
            Payload::None => None,
        };

        let start = self.gpos + consumed_prefix;
        let mut consumed_payload = 0usize;
        if let Some(h) = handler {
            let end = match sized {
                Some(size) => start + size,
                None => self.gdata.len(),
            };
            let payload = self.gdata[start..end].to_vec();
            let mut cursor: &[u8] = &payload;
            h(&mut self.meta, &mut cursor)?;
            consumed_payload = payload.len() - cursor.len();
        }
        self.gpos = start + consumed_payload;
        Ok(())
    }

    /// Reads the next chunk. Produced bytes are appended to `out`, which
    /// is cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
        out.clear();

        loop {
            match self.state {
                State::Start => {
                    self.gather.request(GHDR_LEN);
                    self.state = State::GlobalHeader;
                }

                State::GlobalHeader => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let h = fmt::global_header_read(&d)?;
                    self.meta_crc = h.meta_crc;
                    self.offset = h.meta_off;
                    self.gather
                        .request(usize::try_from(h.meta_size).map_err(|_| Error::BadVarint)?);
                    self.state = State::MetaData;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::MetaData => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    self.gdata = self.gather.take();
                    if !self.gdata.is_empty() {
                        let actual = Crc32::compute(&self.gdata);
                        if actual != self.meta_crc {
                            return Err(Error::BadHeaderCrc {
                                offset: self.offset - self.gdata.len() as u64,
                                expected: self.meta_crc,
                                actual,
                            });
                        }
                    }
                    self.gpos = 0;
                    self.levels = vec![Level::new(CTX_TOP, 0)];
                    self.state = State::BlockId;
                }

                State::BlockId => {
                    if self.gpos == self.gdata.len() {
                        if self.levels.len() != 1 {
                            return Err(Error::Truncated);
                        }
                        self.cur_folder = if self.meta.folders.is_empty() {
                            None
                        } else {
                            Some(0)
                        };
                        self.state = State::NextFile;
                        return Ok(ReadEvent::Done);
                    }
                    self.parse_block()?;
                }

                State::MetaUnpack => match self.pipe_step(input)? {
                    None => {}
                    Some(PipeEvent::More) => return Ok(ReadEvent::More),
                    Some(PipeEvent::Seek(off)) => return Ok(ReadEvent::Seek(off)),
                    Some(PipeEvent::Data) => {
                        let data = match self.pipeline.as_mut() {
                            Some(p) => p.take_output(),
                            None => Vec::new(),
                        };
                        self.crc.update(&data);
                        self.meta_buf.extend_from_slice(&data);
                    }
                    Some(PipeEvent::Done) => {
                        let expected = self.meta.folders[0].files[0].crc;
                        let actual = self.crc.value();
                        if expected != actual {
                            return Err(Error::BadDataCrc {
                                expected: u64::from(expected),
                                actual: u64::from(actual),
                            });
                        }
                        self.pipeline = None;
                        self.meta = Meta::default();
                        self.cur_folder = None;

                        self.gdata = std::mem::take(&mut self.meta_buf);
                        self.gpos = 0;
                        self.state = State::BlockId;
                    }
                },

                State::FileStart => {
                    self.prep_unpack_file()?;
                }

                State::FileData => match self.pipe_step(input)? {
                    None => {}
                    Some(PipeEvent::More) => return Ok(ReadEvent::More),
                    Some(PipeEvent::Seek(off)) => return Ok(ReadEvent::Seek(off)),
                    Some(PipeEvent::Data) => {
                        let data = match self.pipeline.as_mut() {
                            Some(p) => p.take_output(),
                            None => Vec::new(),
                        };
                        self.crc.update(&data);
                        out.extend_from_slice(&data);
                        return Ok(ReadEvent::Data);
                    }
                    Some(PipeEvent::Done) => {
                        let Some(cur) = self.cur_folder else {
                            return Err(Error::NotReady("no current 7z file"));
                        };
                        let folder = &self.meta.folders[cur];
                        let expected = folder.files[folder.ifile - 1].crc;
                        let actual = self.crc.value();
                        if expected != actual {
                            return Err(Error::BadDataCrc {
                                expected: u64::from(expected),
                                actual: u64::from(actual),
                            });
                        }
                        self.state = State::NextFile;
                        return Ok(ReadEvent::FileDone);
                    }
                },

                State::FileDoneEmpty => {
                    self.state = State::NextFile;
                    return Ok(ReadEvent::FileDone);
                }

                State::NextFile => return Ok(ReadEvent::FileHeader),
            }
        }
    }
}
