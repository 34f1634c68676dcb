//! Streaming `.zip` reader.

use crate::archive_path::normalize_name;
use crate::checksum::Crc32;
use crate::error::Warning;
use crate::event::ReadEvent;
use crate::filter::inflate::Inflate;
use crate::filter::store::Store;
use crate::filter::{Filter, FilterStep};
use crate::gather::Gather;
use crate::text::{self, Codepage};
use crate::{Error, Result};

#[cfg(feature = "zstd")]
use crate::filter::zstd::ZstdDecode;

use super::fmt::{self, ZipEntry, ZipMethod};

/// Reader configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipReaderConfig {
    /// Codepage for names without the UTF-8 flag.
    pub codepage: Codepage,
    /// Offset in seconds of the archive's local time (GMT+x).
    pub timezone_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    EocdSeek,
    Eocd,
    Eocd64Loc,
    Eocd64,
    CdirNext,
    Cdir,
    CdirData,
    LocalSeek,
    Local,
    LocalData,
    Data,
    DataFlush,
    Descriptor,
    Descriptor64,
    FileDone,
    FileDone2,
    Done,
}

/// Pull-style `.zip` reader.
///
/// The central directory is enumerated first (`FileHeader` per entry,
/// then `Done`); afterwards [`ZipReader::read_file`] starts per-file
/// streams.
pub struct ZipReader {
    state: State,
    config: ZipReaderConfig,
    gather: Gather,
    offset: u64,
    total_size: u64,
    cdir_end: u64,
    entry: ZipEntry,
    unpack: Filter,
    file_comp_size: u64,
    file_rd: u64,
    file_wr: u64,
    crc: Crc32,
    zip64_descriptor: bool,
}

impl ZipReader {
    /// Creates a reader; the total `.zip` file size must be known.
    pub fn new(total_size: u64, config: ZipReaderConfig) -> Self {
        Self {
            state: State::EocdSeek,
            config,
            gather: Gather::new(),
            offset: total_size,
            total_size,
            cdir_end: 0,
            entry: ZipEntry::default(),
            unpack: Filter::Store(Store::new()),
            file_comp_size: 0,
            file_rd: 0,
            file_wr: 0,
            crc: Crc32::new(),
            zip64_descriptor: false,
        }
    }

    /// Current logical input offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Info for the entry announced by the last `FileHeader` event.
    pub fn entry(&self) -> &ZipEntry {
        &self.entry
    }

    /// Starts reading a file's data.
    ///
    /// `hdr_offset` and `comp_size` come from the entry's CDIR info.
    pub fn read_file(&mut self, hdr_offset: u64, comp_size: u64) {
        self.offset = hdr_offset;
        self.file_comp_size = comp_size;
        self.state = State::LocalSeek;
    }

    fn fill(&mut self, input: &mut &[u8]) -> bool {
        self.offset += self.gather.fill(input) as u64;
        self.gather.ready()
    }

    fn decode_name(&self, raw: &[u8], utf8_flag: bool) -> String {
        let name = if utf8_flag || std::str::from_utf8(raw).is_ok() {
            String::from_utf8_lossy(raw).into_owned()
        } else {
            text::decode_codepage(raw, self.config.codepage)
        };
        normalize_name(name.as_bytes())
    }

    /// Reads the next chunk. Decoded bytes are appended to `out`, which
    /// is cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<ReadEvent> {
        out.clear();

        loop {
            match self.state {
                State::EocdSeek => {
                    let window = fmt::EOCD_SEARCH.min(self.total_size);
                    self.offset = self.total_size - window;
                    self.gather
                        .request(usize::try_from(window).map_err(|_| Error::BadVarint)?);
                    self.state = State::Eocd;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Eocd => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let Some(pos) = fmt::eocd_find(&d) else {
                        return Err(Error::BadStructure("no zip EOCD record"));
                    };
                    let trl = &d[pos..];
                    let eocd = fmt::eocd_read(trl)?;
                    if eocd.disk != 0 || eocd.cdir_disk != 0 {
                        return Err(Error::UnsupportedCodec {
                            what: "multi-disk zip archive",
                        });
                    }

                    if eocd.cdir_offset == 0xffff_ffff
                        || eocd.cdir_size == 0xffff_ffff
                        || eocd.entries == 0xffff
                    {
                        self.offset = self
                            .offset
                            .checked_sub(trl.len() as u64 + fmt::EOCD64_LOC_LEN as u64)
                            .ok_or(Error::Truncated)?;
                        self.gather.request(fmt::EOCD64_LOC_LEN);
                        self.state = State::Eocd64Loc;
                        return Ok(ReadEvent::Seek(self.offset));
                    }

                    self.cdir_end = eocd.cdir_offset + eocd.cdir_size;
                    self.offset = eocd.cdir_offset;
                    self.state = State::CdirNext;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Eocd64Loc => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let (off, disk, disks) = fmt::eocd64_loc_read(&d)?;
                    if disk != 0 || disks != 1 {
                        return Err(Error::UnsupportedCodec {
                            what: "multi-disk zip archive",
                        });
                    }
                    self.offset = off;
                    self.gather.request(fmt::EOCD64_LEN);
                    self.state = State::Eocd64;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Eocd64 => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let eocd = fmt::eocd64_read(&d)?;
                    if eocd.disk != 0 || eocd.cdir_disk != 0 {
                        return Err(Error::UnsupportedCodec {
                            what: "multi-disk zip archive",
                        });
                    }
                    self.cdir_end = eocd.cdir_offset + eocd.cdir_size;
                    self.offset = eocd.cdir_offset;
                    self.state = State::CdirNext;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::CdirNext => {
                    if self.offset + fmt::CDIR_FIXED as u64 > self.cdir_end {
                        return Ok(ReadEvent::Done);
                    }
                    self.gather.request(fmt::CDIR_FIXED);
                    self.state = State::Cdir;
                }

                State::Cdir => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    self.entry = ZipEntry::default();
                    let total =
                        fmt::cdir_entry_read(self.gather.data(), &mut self.entry, self.config.timezone_offset)?;
                    self.gather.request_more(total);
                    self.state = State::CdirData;
                }

                State::CdirData => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let name_len = usize::from(u16::from_le_bytes([d[28], d[29]]));
                    let extra_len = usize::from(u16::from_le_bytes([d[30], d[31]]));
                    let raw_name = &d[fmt::CDIR_FIXED..fmt::CDIR_FIXED + name_len];
                    self.entry.name = self.decode_name(raw_name, self.entry.utf8);

                    let sentinels = fmt::cdir_sentinels(&d);
                    let mut rest =
                        &d[fmt::CDIR_FIXED + name_len..fmt::CDIR_FIXED + name_len + extra_len];
                    while let Some((id, payload, r)) = fmt::extra_next(rest) {
                        log::trace!("zip CDIR extra {id:#06x} [{}]", payload.len());
                        match id {
                            0x0001 => {
                                fmt::extra_zip64_read(payload, sentinels, &mut self.entry)?;
                            }
                            0x000a => {
                                let _ = fmt::extra_ntfs_read(payload, &mut self.entry);
                            }
                            0x5455 => {
                                let _ = fmt::extra_unixtime_read(payload, &mut self.entry);
                            }
                            0x7875 => {
                                let _ = fmt::extra_newunix_read(payload, &mut self.entry);
                            }
                            _ => {}
                        }
                        rest = r;
                    }

                    self.state = State::CdirNext;
                    return Ok(ReadEvent::FileHeader);
                }

                State::LocalSeek => {
                    self.gather.request(fmt::LOCAL_FIXED);
                    self.state = State::Local;
                    return Ok(ReadEvent::Seek(self.offset));
                }

                State::Local => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    self.entry = ZipEntry::default();
                    let total = fmt::local_header_read(
                        self.gather.data(),
                        &mut self.entry,
                        self.config.timezone_offset,
                    )?;

                    self.unpack = match self.entry.method {
                        ZipMethod::Stored => Filter::Store(Store::new()),
                        ZipMethod::Deflated => Filter::Inflate(Inflate::new()),
                        #[cfg(feature = "zstd")]
                        ZipMethod::Zstandard => Filter::ZstdDecode(ZstdDecode::new()?),
                        _ => {
                            return Err(Error::UnsupportedCodec {
                                what: "zip compression method",
                            });
                        }
                    };

                    self.crc.reset();
                    self.file_rd = 0;
                    self.file_wr = 0;
                    self.zip64_descriptor = false;
                    self.gather.request_more(total);
                    self.state = State::LocalData;
                }

                State::LocalData => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    let name_len = usize::from(u16::from_le_bytes([d[26], d[27]]));
                    let extra_len = usize::from(u16::from_le_bytes([d[28], d[29]]));
                    let raw_name = &d[fmt::LOCAL_FIXED..fmt::LOCAL_FIXED + name_len];
                    self.entry.name = self.decode_name(raw_name, self.entry.utf8);

                    let sentinels = fmt::local_sentinels(&d);
                    let mut rest =
                        &d[fmt::LOCAL_FIXED + name_len..fmt::LOCAL_FIXED + name_len + extra_len];
                    while let Some((id, payload, r)) = fmt::extra_next(rest) {
                        match id {
                            0x0001 => {
                                fmt::extra_zip64_read(payload, sentinels, &mut self.entry)?;
                                self.zip64_descriptor = true;
                            }
                            0x5455 => {
                                let _ = fmt::extra_unixtime_read(payload, &mut self.entry);
                            }
                            0x7875 => {
                                let _ = fmt::extra_newunix_read(payload, &mut self.entry);
                            }
                            _ => {}
                        }
                        rest = r;
                    }

                    self.state = State::Data;
                    return Ok(ReadEvent::FileHeader);
                }

                State::Data => {
                    let remaining = self.file_comp_size - self.file_rd;
                    let take = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    let mut sl = &input[..take];
                    let fin = take as u64 == remaining;

                    let step = self.unpack.process(&mut sl, fin, out)?;

                    let consumed = take - sl.len();
                    *input = &input[consumed..];
                    self.offset += consumed as u64;
                    self.file_rd += consumed as u64;

                    match step {
                        FilterStep::More => {
                            if self.file_rd == self.file_comp_size {
                                return Err(Error::Truncated);
                            }
                            return Ok(ReadEvent::More);
                        }
                        FilterStep::Done => {
                            if self.file_rd != self.file_comp_size {
                                return Err(Error::BadStructure(
                                    "unprocessed zip file data",
                                ));
                            }
                            self.state = State::DataFlush;
                        }
                        FilterStep::Data => {
                            self.crc.update(out);
                            self.file_wr += out.len() as u64;
                            return Ok(ReadEvent::Data);
                        }
                        FilterStep::Seek(_) => {
                            return Err(Error::NotReady("unexpected seek from zip decoder"));
                        }
                    }
                }

                State::DataFlush => {
                    if self.entry.has_descriptor {
                        if self.zip64_descriptor {
                            self.gather.request(fmt::DESC64_LEN);
                            self.state = State::Descriptor64;
                        } else {
                            self.gather.request(fmt::DESC_LEN);
                            self.state = State::Descriptor;
                        }
                    } else {
                        self.state = State::FileDone;
                    }
                }

                State::Descriptor => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    fmt::descriptor_read(&d, false, &mut self.entry);
                    self.state = State::FileDone;
                }

                State::Descriptor64 => {
                    if !self.fill(input) {
                        return Ok(ReadEvent::More);
                    }
                    let d = self.gather.take();
                    fmt::descriptor_read(&d, true, &mut self.entry);
                    self.state = State::FileDone;
                }

                State::FileDone => {
                    self.state = State::FileDone2;
                    let actual = self.crc.value();
                    if actual != self.entry.crc {
                        return Ok(ReadEvent::Warning(Warning::DataCrcMismatch {
                            expected: self.entry.crc,
                            actual,
                        }));
                    }
                }

                State::FileDone2 => {
                    self.state = State::Done;
                    return Ok(ReadEvent::FileDone);
                }

                State::Done => {
                    return Err(Error::NotReady("zip reader has nothing to do"));
                }
            }
        }
    }
}
