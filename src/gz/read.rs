//! Streaming `.gz` reader.

use crate::checksum::Crc32;
use crate::error::Warning;
use crate::event::ReadEvent;
use crate::filter::FilterStep;
use crate::filter::inflate::Inflate;
use crate::gather::{Gather, GatherStrz};
use crate::{Error, Result};

use super::fmt::{self, GzInfo, HEADER_LEN, TRAILER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    PreTrailer,
    Header,
    HeaderField,
    ExtraSize,
    Extra,
    Name,
    Comment,
    HeaderCrc,
    Data,
    TrailerFin,
    NextMember,
    Done,
}

/// Pull-style `.gz` reader.
///
/// Create with the total input size when it is known; the reader then
/// seeks to the trailer first to recover the uncompressed size, and
/// detects the end of a multi-member file by offset. Without a size hint
/// the caller signals end of input with [`GzReader::finish`].
pub struct GzReader {
    state: State,
    gather: Gather,
    strz: GatherStrz,
    offset: u64,
    total_size: Option<u64>,
    hdr_flags: u8,
    crc: Crc32,
    inflate: Inflate,
    info: GzInfo,
    input_done: bool,
}

impl GzReader {
    /// Creates a reader. `total_size` is the `.gz` file size, or `None`
    /// when unknown.
    pub fn new(total_size: Option<u64>) -> Self {
        Self {
            state: State::Begin,
            gather: Gather::new(),
            strz: GatherStrz::default(),
            offset: 0,
            total_size,
            hdr_flags: 0,
            crc: Crc32::new(),
            inflate: Inflate::new(),
            info: GzInfo::default(),
            input_done: false,
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Info from the current member's header (and the file trailer when a
    /// total size was given).
    pub fn info(&self) -> &GzInfo {
        &self.info
    }

    /// Declares that no more input exists. Only needed for multi-member
    /// detection when the total size was unknown.
    pub fn finish(&mut self) {
        self.input_done = true;
    }

    fn fill(&mut self, input: &mut &[u8]) -> bool {
        self.offset += self.gather.fill(input) as u64;
        self.gather.ready()
    }

    /// Reads the next chunk. Produced bytes are appended to `out`, which
    /// is cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
        out.clear();

        loop {
            match self.state {
                State::Begin => {
                    if let Some(total) = self.total_size {
                        if total <= TRAILER_LEN as u64 {
                            return Err(Error::Truncated);
                        }
                        self.offset = total - TRAILER_LEN as u64;
                        self.gather.request(TRAILER_LEN);
                        self.state = State::PreTrailer;
                        return Ok(ReadEvent::Seek(self.offset));
                    }
                    self.gather.request(HEADER_LEN);
                    self.state = State::Header;
                }

                State::PreTrailer => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let (crc, size32) = fmt::trailer_read(&d);
                    self.info.uncompressed_crc = crc;
                    self.info.uncompressed_size =
                        (self.offset & 0xffff_ffff_0000_0000) | u64::from(size32);

                    self.offset = 0;
                    self.gather.request(HEADER_LEN);
                    self.state = State::Header;
                    return Ok(ReadEvent::Seek(0));
                }

                State::Header => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let mut mtime = 0;
                    let flags = fmt::header_read(&d, &mut mtime)?;
                    self.info.mtime = mtime;
                    self.hdr_flags = flags;
                    self.state = State::HeaderField;
                    if flags & !fmt::FLAG_ALL != 0 {
                        return Ok(ReadEvent::Warning(Warning::GzHeaderFlags { flags }));
                    }
                }

                State::HeaderField => {
                    if self.hdr_flags & fmt::FLAG_EXTRA != 0 {
                        self.gather.request(2);
                        self.state = State::ExtraSize;
                    } else if self.hdr_flags & fmt::FLAG_NAME != 0 {
                        self.strz.reset();
                        self.state = State::Name;
                    } else if self.hdr_flags & fmt::FLAG_COMMENT != 0 {
                        self.strz.reset();
                        self.state = State::Comment;
                    } else if self.hdr_flags & fmt::FLAG_HDR_CRC != 0 {
                        self.gather.request(2);
                        self.state = State::HeaderCrc;
                    } else {
                        self.state = State::Data;
                        return Ok(ReadEvent::Info);
                    }
                }

                State::ExtraSize => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let len = u16::from_le_bytes([d[0], d[1]]);
                    self.gather.request(usize::from(len));
                    self.state = State::Extra;
                }

                State::Extra => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    self.info.extra = self.gather.take();
                    self.hdr_flags &= !fmt::FLAG_EXTRA;
                    self.state = State::HeaderField;
                }

                State::Name => {
                    self.offset += self.strz.fill(input) as u64;
                    if !self.strz.ready() {
                        return Ok(ReadEvent::More);
                    }
                    self.info.name = self.strz.take();
                    self.hdr_flags &= !fmt::FLAG_NAME;
                    self.state = State::HeaderField;
                }

                State::Comment => {
                    self.offset += self.strz.fill(input) as u64;
                    if !self.strz.ready() {
                        return Ok(ReadEvent::More);
                    }
                    self.info.comment = self.strz.take();
                    self.hdr_flags &= !fmt::FLAG_COMMENT;
                    self.state = State::HeaderField;
                }

                State::HeaderCrc => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let _ = self.gather.take();
                    self.hdr_flags &= !fmt::FLAG_HDR_CRC;
                    self.state = State::HeaderField;
                }

                State::Data => {
                    let before = input.len();
                    let step = self.inflate.process(input, false, out)?;
                    let consumed = (before - input.len()) as u64;
                    self.offset += consumed;
                    self.info.compressed_size += consumed;

                    match step {
                        FilterStep::More => return Ok(ReadEvent::More),
                        FilterStep::Data => {
                            self.crc.update(out);
                            return Ok(ReadEvent::Data);
                        }
                        FilterStep::Done => {
                            self.gather.request(TRAILER_LEN);
                            self.state = State::TrailerFin;
                        }
                        FilterStep::Seek(_) => {
                            return Err(Error::NotReady("unexpected seek from inflate"));
                        }
                    }
                }

                State::TrailerFin => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let (expected, _size32) = fmt::trailer_read(&d);
                    self.info.uncompressed_crc = expected;

                    let actual = self.crc.value();
                    self.state = State::NextMember;
                    if actual != expected {
                        return Ok(ReadEvent::Warning(Warning::DataCrcMismatch {
                            expected,
                            actual,
                        }));
                    }
                }

                State::NextMember => {
                    let at_end = match self.total_size {
                        Some(total) => self.offset >= total,
                        None => input.is_empty() && self.input_done,
                    };
                    if at_end {
                        self.state = State::Done;
                        continue;
                    }
                    if self.total_size.is_none() && input.is_empty() {
                        return Ok(ReadEvent::More);
                    }

                    // another concatenated member follows
                    self.crc.reset();
                    self.inflate.reset();
                    self.info.extra.clear();
                    self.info.name.clear();
                    self.info.comment.clear();
                    self.gather.request(HEADER_LEN);
                    self.state = State::Header;
                }

                State::Done => return Ok(ReadEvent::Done),
            }
        }
    }
}
