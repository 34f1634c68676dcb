//! Streaming `.zip` writer.

use crate::archive_path::{Normalize, normalize};
use crate::event::WriteEvent;
use crate::filter::crc32::Crc32Tap;
use crate::filter::deflate::Deflate;
use crate::filter::store::Store;
use crate::filter::{Filter, FilterStep};
use crate::timestamp::Timestamp;
use crate::{Error, Result};

#[cfg(feature = "zstd")]
use crate::filter::zstd::ZstdEncode;

use super::fmt::{self, ZipEntry, ZipMethod};

/// Writer configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipWriterConfig {
    /// Never ask the caller to seek; sizes go into zip64 data
    /// descriptors instead of patched local headers.
    pub non_seekable: bool,
    /// Offset in seconds of the archive's local time (GMT+x).
    pub timezone_offset: i32,
}

/// Per-entry options for [`ZipWriter::add_file`].
#[derive(Debug, Clone, Default)]
pub struct ZipFileOptions {
    /// Entry name; normalized, directories get a trailing `/`.
    pub name: String,
    /// Modification time.
    pub mtime: Timestamp,
    /// Windows attribute bits.
    pub attr_win: u32,
    /// Unix mode bits.
    pub attr_unix: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Compression method; directories are always stored.
    pub method: ZipMethod,
    /// Deflate level 1..=9; 0 selects the library default.
    pub deflate_level: u32,
    /// Zstd level; 0 selects the library default.
    pub zstd_level: i32,
    /// Zstd worker threads inside the library; 0 disables.
    pub zstd_workers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FileHeader,
    Data,
    HeaderUpdate,
    EndSeek,
    Descriptor,
    FileDone,
    Cdir,
    Done,
}

/// Push-style `.zip` writer.
///
/// For every entry: [`ZipWriter::add_file`], push the data through
/// [`ZipWriter::process`], then [`ZipWriter::finish_file`]. Close the
/// archive with [`ZipWriter::finish`].
pub struct ZipWriter {
    state: State,
    config: ZipWriterConfig,
    header: Vec<u8>,
    header_copy: Vec<u8>,
    cdir: Vec<u8>,
    cdir_entry_start: usize,
    cdir_items: u64,
    /// Stage 0 taps the CRC, stage 1 compresses.
    filters: [Filter; 2],
    staged: Vec<u8>,
    file_rd: u64,
    file_wr: u64,
    total_wr: u64,
    offset: u64,
    fhdr_offset: u64,
    file_fin: bool,
    arc_fin: bool,
}

impl ZipWriter {
    /// Creates a writer.
    pub fn new(config: ZipWriterConfig) -> Self {
        Self {
            state: State::FileHeader,
            config,
            header: Vec::new(),
            header_copy: Vec::new(),
            cdir: Vec::new(),
            cdir_entry_start: 0,
            cdir_items: 0,
            filters: [
                Filter::Crc32(Crc32Tap::new()),
                Filter::Store(Store::new()),
            ],
            staged: Vec::new(),
            file_rd: 0,
            file_wr: 0,
            total_wr: 0,
            offset: 0,
            fhdr_offset: 0,
            file_fin: false,
            arc_fin: false,
        }
    }

    /// Current logical output offset (after a `Seek` event, the position
    /// the next output bytes must land at).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn crc_value(&self) -> u32 {
        match &self.filters[0] {
            Filter::Crc32(tap) => tap.value(),
            _ => 0,
        }
    }

    /// Prepares the next entry.
    ///
    /// Directory entries (`attr_win` `0x10` or a Unix directory mode) are
    /// stored uncompressed with a trailing slash.
    pub fn add_file(&mut self, opts: &ZipFileOptions) -> Result<()> {
        if self.state != State::FileHeader || !self.header.is_empty() {
            return Err(Error::NotReady("previous zip entry is not finished"));
        }

        let dir = opts.attr_win & 0x10 != 0 || opts.attr_unix & 0o170000 == 0o040000;
        let mut name = normalize(&opts.name, Normalize::archive());
        if name.is_empty() {
            return Err(Error::NameInvalid("zip entry name normalizes to empty"));
        }
        if dir && !name.ends_with('/') {
            name.push('/');
        }

        let method = if dir { ZipMethod::Stored } else { opts.method };
        let info = ZipEntry {
            name,
            mtime: opts.mtime,
            attr_win: opts.attr_win,
            attr_unix: opts.attr_unix,
            uid: opts.uid,
            gid: opts.gid,
            method,
            has_descriptor: self.config.non_seekable,
            hdr_offset: self.total_wr,
            ..ZipEntry::default()
        };

        self.header.clear();
        fmt::local_header_write(&mut self.header, &info, self.config.timezone_offset)?;
        self.header_copy = self.header.clone();

        self.cdir_entry_start = self.cdir.len();
        fmt::cdir_entry_write(&mut self.cdir, &info, self.config.timezone_offset)?;

        self.filters[1] = match method {
            ZipMethod::Stored => Filter::Store(Store::new()),
            ZipMethod::Deflated => Filter::Deflate(Deflate::new(opts.deflate_level)),
            #[cfg(feature = "zstd")]
            ZipMethod::Zstandard => {
                Filter::ZstdEncode(ZstdEncode::new(opts.zstd_level, opts.zstd_workers)?)
            }
            _ => {
                return Err(Error::UnsupportedCodec {
                    what: "zip compression method",
                });
            }
        };
        self.filters[0] = Filter::Crc32(Crc32Tap::new());
        self.staged.clear();
        Ok(())
    }

    /// Declares the current entry's data complete.
    pub fn finish_file(&mut self) {
        self.file_fin = true;
    }

    /// Declares the archive complete.
    pub fn finish(&mut self) {
        self.arc_fin = true;
    }

    /// Writes the next chunk. Output bytes are appended to `out`, which
    /// is cleared on entry.
    pub fn process(&mut self, input: &mut &[u8], out: &mut Vec<u8>) -> Result<WriteEvent> {
        out.clear();

        loop {
            match self.state {
                State::FileHeader => {
                    if self.arc_fin {
                        self.state = State::Cdir;
                        continue;
                    }
                    if self.header.is_empty() {
                        return Err(Error::NotReady("no zip entry added"));
                    }
                    self.fhdr_offset = self.total_wr;
                    out.append(&mut self.header);
                    self.total_wr += out.len() as u64;
                    self.file_rd = 0;
                    self.file_wr = 0;
                    self.state = State::Data;
                    return Ok(WriteEvent::Data);
                }

                State::Data => {
                    // stage input through the CRC filter, then compress
                    if !input.is_empty() {
                        let mut sl: &[u8] = *input;
                        let _ = self.filters[0].process(&mut sl, false, &mut self.staged)?;
                        let consumed = input.len() - sl.len();
                        self.file_rd += consumed as u64;
                        *input = sl;
                    }

                    let mut sl = &self.staged[..];
                    let step = {
                        let [_, codec] = &mut self.filters;
                        codec.process(&mut sl, self.file_fin, out)?
                    };
                    let consumed = self.staged.len() - sl.len();
                    self.staged.drain(..consumed);

                    match step {
                        FilterStep::More => return Ok(WriteEvent::More),
                        FilterStep::Data => {
                            self.file_wr += out.len() as u64;
                            self.total_wr += out.len() as u64;
                            return Ok(WriteEvent::Data);
                        }
                        FilterStep::Done => {
                            let crc = self.crc_value();
                            fmt::cdir_entry_finish(
                                &mut self.cdir[self.cdir_entry_start..],
                                self.file_rd,
                                self.file_wr,
                                crc,
                            );
                            self.cdir_items += 1;

                            if self.config.non_seekable {
                                self.state = State::Descriptor;
                                continue;
                            }
                            self.state = State::HeaderUpdate;
                            self.offset = self.fhdr_offset;
                            return Ok(WriteEvent::Seek(self.offset));
                        }
                        FilterStep::Seek(_) => {
                            return Err(Error::NotReady("unexpected seek from zip encoder"));
                        }
                    }
                }

                State::HeaderUpdate => {
                    let crc = self.crc_value();
                    fmt::local_header_update(
                        &mut self.header_copy,
                        self.file_rd,
                        self.file_wr,
                        crc,
                    );
                    out.append(&mut self.header_copy);
                    self.state = State::EndSeek;
                    return Ok(WriteEvent::Data);
                }

                State::EndSeek => {
                    self.state = State::FileDone;
                    self.offset = self.total_wr;
                    return Ok(WriteEvent::Seek(self.offset));
                }

                State::Descriptor => {
                    fmt::descriptor64_write(out, self.file_rd, self.file_wr, self.crc_value());
                    self.total_wr += out.len() as u64;
                    self.state = State::FileDone;
                    return Ok(WriteEvent::Data);
                }

                State::FileDone => {
                    self.file_fin = false;
                    self.state = State::FileHeader;
                    return Ok(WriteEvent::FileDone);
                }

                State::Cdir => {
                    let cdir_size = self.cdir.len() as u64;
                    let eocd64_off = self.total_wr + cdir_size;
                    let mut tail = std::mem::take(&mut self.cdir);
                    fmt::eocd64_write(&mut tail, cdir_size, self.total_wr, self.cdir_items);
                    fmt::eocd64_loc_write(&mut tail, eocd64_off);
                    fmt::eocd_write(&mut tail, 0xffff_ffff, 0xffff_ffff, 0xffff);
                    self.total_wr += tail.len() as u64;
                    out.append(&mut tail);
                    self.state = State::Done;
                    return Ok(WriteEvent::Data);
                }

                State::Done => return Ok(WriteEvent::Done),
            }
        }
    }
}
