//! Streaming `.xz` reader.

use crate::checksum::{Crc32, Crc64};
use crate::event::ReadEvent;
use crate::filter::FilterStep;
use crate::filter::bcj::BcjDecode;
use crate::filter::lzma::{Lzma2Scan, LzmaDecode};
use crate::gather::Gather;
use crate::{Error, Result};

use super::fmt::{
    self, CheckMethod, STREAM_FOOTER_LEN, STREAM_HEADER_LEN, XzInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    Footer,
    Index,
    HeaderSeek,
    Header,
    BlockStart,
    BlockHeader,
    BlockData,
    BlockEmit,
    BcjFlush,
    BlockPadding,
    BlockCheck,
    SkipIndex,
    FooterFin,
    Done,
}

/// Pull-style `.xz` reader.
///
/// The reader seeks to the stream footer and index first to recover the
/// uncompressed size, then decodes blocks from the start. The total input
/// size must be known.
pub struct XzReader {
    state: State,
    gather: Gather,
    offset: u64,
    total_size: Option<u64>,
    idx_remaining: u64,
    check: CheckMethod,
    check_crc32: Crc32,
    check_crc64: Crc64,
    lzma: Option<LzmaDecode>,
    bcj: Option<BcjDecode>,
    scan: Lzma2Scan,
    block_comp_len: u64,
    tmp: Vec<u8>,
    info: XzInfo,
}

fn check_update(check: CheckMethod, c32: &mut Crc32, c64: &mut Crc64, data: &[u8]) {
    match check {
        CheckMethod::Crc32 => c32.update(data),
        CheckMethod::Crc64 => c64.update(data),
        CheckMethod::None | CheckMethod::Sha256 => {}
    }
}

impl XzReader {
    /// Creates a reader. `total_size` is the `.xz` file size; `None` is
    /// accepted but the index cannot be located without it and reading
    /// fails at the end of the last block.
    pub fn new(total_size: Option<u64>) -> Self {
        Self {
            state: State::Begin,
            gather: Gather::new(),
            offset: 0,
            total_size,
            idx_remaining: 0,
            check: CheckMethod::None,
            check_crc32: Crc32::new(),
            check_crc64: Crc64::new(),
            lzma: None,
            bcj: None,
            scan: Lzma2Scan::new(),
            block_comp_len: 0,
            tmp: Vec::new(),
            info: XzInfo::default(),
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stream info, valid after the `Info` event.
    pub fn info(&self) -> &XzInfo {
        &self.info
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
                        if total <= STREAM_FOOTER_LEN as u64 {
                            return Err(Error::Truncated);
                        }
                        self.offset = total - STREAM_FOOTER_LEN as u64;
                        self.gather.request(STREAM_FOOTER_LEN);
                        self.state = State::Footer;
                        return Ok(ReadEvent::Seek(self.offset));
                    }
                    self.gather.request(STREAM_HEADER_LEN);
                    self.state = State::Header;
                }

                State::Footer => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let idx_size =
                        fmt::stream_footer_read(&d, self.offset - d.len() as u64)?;
                    self.idx_remaining = idx_size;

                    self.offset = self
                        .offset
                        .checked_sub(d.len() as u64 + idx_size)
                        .ok_or(Error::Truncated)?;
                    self.gather
                        .request(usize::try_from(idx_size).map_err(|_| Error::BadVarint)?);
                    self.state = State::Index;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Index => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    self.info.uncompressed_size =
                        fmt::index_read(&d, self.offset - d.len() as u64)?;
                    self.state = State::HeaderSeek;
                    return Ok(ReadEvent::Info);
                }

                State::HeaderSeek => {
                    self.offset = 0;
                    self.gather.request(STREAM_HEADER_LEN);
                    self.state = State::Header;
                    return Ok(ReadEvent::Seek(0));
                }

                State::Header => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    self.check = fmt::stream_header_read(&d)?;
                    self.state = State::BlockStart;
                }

                State::BlockStart => {
                    let Some(&size_byte) = input.first() else {
                        return Ok(ReadEvent::More);
                    };
                    if size_byte == 0 {
                        self.state = State::SkipIndex;
                        continue;
                    }
                    self.gather.request((usize::from(size_byte) + 1) * 4);
                    self.state = State::BlockHeader;
                }

                State::BlockHeader => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let filters = fmt::block_header_read(&d, self.offset - d.len() as u64)?;

                    let (bcj, lzma_props) = match filters.as_slice() {
                        [f] if f.id == fmt::FILTER_LZMA2 => (None, &f.props),
                        [x86, f] if x86.id == fmt::FILTER_X86 && f.id == fmt::FILTER_LZMA2 => {
                            (Some(BcjDecode::new()), &f.props)
                        }
                        _ => {
                            return Err(Error::UnsupportedCodec {
                                what: "xz block filter chain",
                            });
                        }
                    };
                    self.bcj = bcj;
                    self.lzma = Some(LzmaDecode::lzma2(lzma_props)?);
                    self.scan = Lzma2Scan::new();
                    self.check_crc32.reset();
                    self.check_crc64 = Crc64::new();
                    self.block_comp_len = 0;
                    self.state = State::BlockData;
                }

                State::BlockData => {
                    if input.is_empty() {
                        return Ok(ReadEvent::More);
                    }
                    let n = self.scan.push(input)?;
                    let lzma = self
                        .lzma
                        .as_mut()
                        .ok_or(Error::NotReady("no active xz block"))?;
                    let mut sl = &input[..n];
                    lzma.process(&mut sl, false, &mut self.tmp)?;
                    *input = &input[n..];
                    self.offset += n as u64;
                    self.info.compressed_size += n as u64;
                    self.block_comp_len += n as u64;

                    if !self.scan.done() {
                        return Ok(ReadEvent::More);
                    }
                    self.state = State::BlockEmit;
                }

                State::BlockEmit => {
                    let lzma = self
                        .lzma
                        .as_mut()
                        .ok_or(Error::NotReady("no active xz block"))?;
                    self.tmp.clear();
                    let mut empty: &[u8] = &[];
                    match lzma.process(&mut empty, true, &mut self.tmp)? {
                        FilterStep::Data => {
                            if let Some(bcj) = self.bcj.as_mut() {
                                let mut sl = &self.tmp[..];
                                let step = bcj.process(&mut sl, false, out);
                                if step == FilterStep::Data {
                                    check_update(
                                        self.check,
                                        &mut self.check_crc32,
                                        &mut self.check_crc64,
                                        out,
                                    );
                                    return Ok(ReadEvent::Data);
                                }
                                // bcj carried everything; decode more
                            } else {
                                check_update(
                                    self.check,
                                    &mut self.check_crc32,
                                    &mut self.check_crc64,
                                    &self.tmp,
                                );
                                out.append(&mut self.tmp);
                                return Ok(ReadEvent::Data);
                            }
                        }
                        FilterStep::Done => {
                            self.state = if self.bcj.is_some() {
                                State::BcjFlush
                            } else {
                                self.request_block_padding();
                                State::BlockPadding
                            };
                        }
                        FilterStep::More | FilterStep::Seek(_) => {
                            return Err(Error::Truncated);
                        }
                    }
                }

                State::BcjFlush => {
                    let Some(bcj) = self.bcj.as_mut() else {
                        return Err(Error::NotReady("no active bcj filter"));
                    };
                    let mut empty: &[u8] = &[];
                    match bcj.process(&mut empty, true, out) {
                        FilterStep::Data => {
                            check_update(
                                self.check,
                                &mut self.check_crc32,
                                &mut self.check_crc64,
                                out,
                            );
                            return Ok(ReadEvent::Data);
                        }
                        _ => {
                            self.request_block_padding();
                            self.state = State::BlockPadding;
                        }
                    }
                }

                State::BlockPadding => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    if !d.iter().all(|&b| b == 0) {
                        return Err(Error::BadStructure("nonzero xz block padding"));
                    }
                    self.gather.request(self.check.len());
                    self.state = State::BlockCheck;
                }

                State::BlockCheck => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    match self.check {
                        CheckMethod::Crc32 => {
                            let expected = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
                            let actual = self.check_crc32.value();
                            if expected != actual {
                                return Err(Error::BadDataCrc {
                                    expected: u64::from(expected),
                                    actual: u64::from(actual),
                                });
                            }
                        }
                        CheckMethod::Crc64 => {
                            let expected = u64::from_le_bytes(
                                d[..8].try_into().map_err(|_| Error::Truncated)?,
                            );
                            let actual = self.check_crc64.value();
                            if expected != actual {
                                return Err(Error::BadDataCrc {
                                    expected,
                                    actual,
                                });
                            }
                        }
                        CheckMethod::None | CheckMethod::Sha256 => {}
                    }
                    self.lzma = None;
                    self.bcj = None;
                    self.state = State::BlockStart;
                }

                State::SkipIndex => {
                    if self.total_size.is_none() {
                        return Err(Error::UnsupportedCodec {
                            what: "xz index without a total-size hint",
                        });
                    }
                    let n = usize::try_from(self.idx_remaining)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    *input = &input[n..];
                    self.offset += n as u64;
                    self.idx_remaining -= n as u64;
                    if self.idx_remaining != 0 {
                        return Ok(ReadEvent::More);
                    }
                    self.gather.request(STREAM_FOOTER_LEN);
                    self.state = State::FooterFin;
                }

                State::FooterFin => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    fmt::stream_footer_read(&d, self.offset - d.len() as u64)?;
                    self.state = State::Done;
                }

                State::Done => return Ok(ReadEvent::Done),
            }
        }
    }

    fn request_block_padding(&mut self) {
        let padding = (4 - (self.block_comp_len % 4) as usize) % 4;
        self.gather.request(padding);
    }
}
